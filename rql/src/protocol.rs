//! Semantics of the remote play protocol, independent of the HTTP transport carrying it.
//!
//! - Setup: form fields `inputCount`, `gameName`; reply `{"reply": "ok", "sessionId": "<id>"}`
//! - Step: multipart form with the binary image field `screen` plus the fields `sessionId`, `reward`,
//!   `isTerminal` and the optional per-episode `stepIndex`; reply `{"action": <n>}`, `{"reply": "ok"}` after a terminal step
//!   or `{"reply": "stopped"}` when no session is bound
//! - any rejected request: `{"reply": "error", "error": "<message>"}`
//!
//! A step repeating the `stepIndex` of the previous one (a client retry) is answered
//! with the previous reply and does not advance the session.

use std::fmt::{Display, Formatter};
use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, ImageOutputFormat};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::prelude::{ActionIndex, GrayFrame, Result, RqlError};

pub const FIELD_INPUT_COUNT: &str = "inputCount";
pub const FIELD_GAME_NAME: &str = "gameName";
pub const FIELD_SESSION_ID: &str = "sessionId";
pub const FIELD_SCREEN: &str = "screen";
pub const FIELD_REWARD: &str = "reward";
pub const FIELD_IS_TERMINAL: &str = "isTerminal";
pub const FIELD_STEP_INDEX: &str = "stepIndex";

pub const REPLY_OK: &str = "ok";
pub const REPLY_STOPPED: &str = "stopped";
pub const REPLY_ERROR: &str = "error";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        SessionId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        SessionId(value.to_string())
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Text fields of a submitted form, in submission order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FormFields(Vec<(String, String)>);

impl FormFields {
    pub fn new(fields: Vec<(String, String)>) -> Self {
        FormFields(fields)
    }

    pub fn push(&mut self, name: &str, value: String) {
        self.0.push((name.to_string(), value))
    }

    /// First value submitted for `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    fn require(&self, name: &str) -> Result<&str> {
        self.get(name).ok_or_else(|| RqlError::protocol(format!("missing field '{}'", name)))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetupRequest {
    pub action_count: usize,
    pub game_name: String,
}

impl SetupRequest {
    pub fn from_fields(fields: &FormFields) -> Result<Self> {
        let action_count = fields.require(FIELD_INPUT_COUNT)?;
        let action_count = action_count.trim().parse::<usize>()
            .map_err(|_| RqlError::protocol(format!("'{}' is not a valid {}", action_count, FIELD_INPUT_COUNT)))?;
        if action_count == 0 {
            return Err(RqlError::protocol(format!("{} must be at least 1", FIELD_INPUT_COUNT)));
        }
        Ok(Self {
            action_count,
            game_name: fields.require(FIELD_GAME_NAME)?.to_string(),
        })
    }

    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            (FIELD_INPUT_COUNT, self.action_count.to_string()),
            (FIELD_GAME_NAME, self.game_name.clone()),
        ]
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetupReply {
    pub session_id: SessionId,
}

/// Compressed screen as transferred in the `screen` field
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedFrame(pub Vec<u8>);

#[derive(Clone, Debug, PartialEq)]
pub struct StepRequest {
    pub session_id: Option<SessionId>,
    pub screen: EncodedFrame,
    /// Reward earned by the previous action
    pub reward: f64,
    pub terminal: bool,
    /// Position of the step within its episode, identifies retries
    pub step_index: Option<u64>,
}

impl StepRequest {
    pub fn from_fields(fields: &FormFields, screen: Option<Vec<u8>>) -> Result<Self> {
        let screen = screen.ok_or_else(|| RqlError::protocol(format!("missing field '{}'", FIELD_SCREEN)))?;
        Ok(Self {
            session_id: fields.get(FIELD_SESSION_ID).filter(|id| !id.is_empty()).map(SessionId::from),
            screen: EncodedFrame(screen),
            reward: parse_reward(fields.require(FIELD_REWARD)?)?,
            terminal: fields.get(FIELD_IS_TERMINAL).map(parse_flag).unwrap_or(false),
            step_index: fields.get(FIELD_STEP_INDEX).map(parse_step_index).transpose()?,
        })
    }

    /// Text fields accompanying the `screen` field
    pub fn to_text_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            (FIELD_REWARD, format_reward(self.reward)),
            (FIELD_IS_TERMINAL, if self.terminal { "True" } else { "False" }.to_string()),
        ];
        if let Some(id) = &self.session_id {
            fields.push((FIELD_SESSION_ID, id.to_string()));
        }
        if let Some(index) = self.step_index {
            fields.push((FIELD_STEP_INDEX, index.to_string()));
        }
        fields
    }
}

fn parse_step_index(value: &str) -> Result<u64> {
    value.trim().parse()
        .map_err(|_| RqlError::protocol(format!("'{}' is not a valid {}", value, FIELD_STEP_INDEX)))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepReply {
    /// Next action to apply
    Action(ActionIndex),
    /// Terminal step accepted; a new setup is expected for the next episode
    Acknowledged,
    /// No session bound; a new setup is required
    Stopped,
}

/// JSON body of every reply
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WireReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionIndex>,
    #[serde(default, rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WireReply {
    pub fn error(error: &RqlError) -> Self {
        Self {
            reply: Some(REPLY_ERROR.to_string()),
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    fn rejection(&self) -> RqlError {
        RqlError::Protocol(format!(
            "request rejected: {}",
            self.error.as_deref().unwrap_or("no reason given")
        ))
    }
}

impl From<&SetupReply> for WireReply {
    fn from(value: &SetupReply) -> Self {
        Self {
            reply: Some(REPLY_OK.to_string()),
            session_id: Some(value.session_id.to_string()),
            ..Default::default()
        }
    }
}

impl From<StepReply> for WireReply {
    fn from(value: StepReply) -> Self {
        match value {
            StepReply::Action(action) => Self { action: Some(action), ..Default::default() },
            StepReply::Acknowledged => Self { reply: Some(REPLY_OK.to_string()), ..Default::default() },
            StepReply::Stopped => Self { reply: Some(REPLY_STOPPED.to_string()), ..Default::default() },
        }
    }
}

impl TryFrom<WireReply> for SetupReply {
    type Error = RqlError;

    fn try_from(value: WireReply) -> Result<Self> {
        match (value.reply.as_deref(), &value.session_id) {
            (Some(REPLY_OK), Some(id)) => Ok(SetupReply { session_id: SessionId::from(id.as_str()) }),
            (Some(REPLY_OK), None) => Err(RqlError::protocol("setup acknowledged without a session id")),
            (Some(REPLY_ERROR), _) => Err(value.rejection()),
            (reply, _) => Err(RqlError::protocol(format!("setup not acknowledged (reply: {:?})", reply))),
        }
    }
}

impl TryFrom<WireReply> for StepReply {
    type Error = RqlError;

    fn try_from(value: WireReply) -> Result<Self> {
        match (value.action, value.reply.as_deref()) {
            (Some(action), _) => Ok(StepReply::Action(action)),
            (None, Some(REPLY_OK)) => Ok(StepReply::Acknowledged),
            (None, Some(REPLY_STOPPED)) => Ok(StepReply::Stopped),
            (None, Some(REPLY_ERROR)) => Err(value.rejection()),
            (None, reply) => Err(RqlError::protocol(format!("unexpected step reply {:?}", reply))),
        }
    }
}

/// Boolean-ish form value: `yes`, `true`, `t` and `1` (any case) are true, everything else false
pub fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "yes" | "true" | "t" | "1")
}

pub fn parse_reward(value: &str) -> Result<f64> {
    let value = value.trim();
    value.parse::<i64>().map(|r| r as f64)
        .or_else(|_| value.parse::<f64>())
        .ok()
        .filter(|r| r.is_finite())
        .ok_or_else(|| RqlError::protocol(format!("'{}' is not a valid {}", value, FIELD_REWARD)))
}

/// Integral rewards are written without fraction
pub fn format_reward(reward: f64) -> String {
    if reward.fract() == 0.0 && reward.abs() < i64::MAX as f64 {
        format!("{}", reward as i64)
    } else {
        format!("{}", reward)
    }
}

/// How rewards are converted before they are forwarded to the server
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RewardRounding {
    /// Cut off the fraction (integer cast)
    Truncate,
    Round,
    Preserve,
}

impl RewardRounding {
    pub fn apply(&self, reward: f32) -> f64 {
        let reward = reward as f64;
        match self {
            RewardRounding::Truncate => reward.trunc(),
            RewardRounding::Round => reward.round(),
            RewardRounding::Preserve => reward,
        }
    }
}

/// Frame compression used for the `screen` field
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameEncoding {
    Jpeg { quality: u8 },
    Png,
}

impl Default for FrameEncoding {
    fn default() -> Self {
        FrameEncoding::Jpeg { quality: 90 }
    }
}

impl FrameEncoding {
    pub fn mime_type(&self) -> &'static str {
        match self {
            FrameEncoding::Jpeg { .. } => "image/jpeg",
            FrameEncoding::Png => "image/png",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            FrameEncoding::Jpeg { .. } => "capture.jpg",
            FrameEncoding::Png => "capture.png",
        }
    }

    pub fn encode(&self, frame: &GrayFrame) -> Result<EncodedFrame> {
        let mut bytes = Vec::new();
        match self {
            FrameEncoding::Jpeg { quality } => {
                JpegEncoder::new_with_quality(&mut bytes, *quality)
                    .encode(frame.as_raw(), frame.width(), frame.height(), ColorType::L8)?;
            }
            FrameEncoding::Png => {
                frame.write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)?;
            }
        }
        Ok(EncodedFrame(bytes))
    }
}

/// Decodes a received screen (any supported image format) into a single-channel frame.
/// The image header is checked against `expected` (width, height) before any pixel data is decoded.
pub fn decode_frame(frame: &EncodedFrame, expected: (u32, u32)) -> Result<GrayFrame> {
    let reader = || {
        image::io::Reader::new(Cursor::new(frame.0.as_slice()))
            .with_guessed_format()
            .map_err(image::ImageError::IoError)
    };
    let actual = reader()?.into_dimensions()?;
    if actual != expected {
        return Err(RqlError::FrameDimension { expected, actual });
    }
    Ok(reader()?.decode()?.into_luma8())
}
