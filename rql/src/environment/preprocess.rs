use image::imageops::{self, FilterType};
use image::Luma;

use crate::environment::EnvironmentSettings;
use crate::prelude::GrayFrame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeFilter {
    Nearest,
    Bilinear,
}

impl From<ResizeFilter> for FilterType {
    fn from(value: ResizeFilter) -> Self {
        match value {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Bilinear => FilterType::Triangle,
        }
    }
}

/// Turns native emulator screens into frames of the configured size
#[derive(Clone, Debug)]
pub struct ScreenPreprocessor {
    width: u32,
    height: u32,
    color_averaging: bool,
    filter: FilterType,
}

impl ScreenPreprocessor {
    pub fn new(settings: &EnvironmentSettings) -> Self {
        assert!(settings.screen_width > 0 && settings.screen_height > 0);
        Self {
            width: settings.screen_width,
            height: settings.screen_height,
            color_averaging: settings.color_averaging,
            filter: settings.resize_filter.into(),
        }
    }

    pub fn process(&self, screen: &GrayFrame, previous: Option<&GrayFrame>) -> GrayFrame {
        let averaged = match previous {
            Some(previous) if self.color_averaging && previous.dimensions() == screen.dimensions() => {
                Some(average(screen, previous))
            }
            _ => None,
        };
        let screen = averaged.as_ref().unwrap_or(screen);

        if screen.dimensions() == (self.width, self.height) {
            screen.clone()
        } else {
            imageops::resize(screen, self.width, self.height, self.filter)
        }
    }
}

fn average(a: &GrayFrame, b: &GrayFrame) -> GrayFrame {
    GrayFrame::from_fn(a.width(), a.height(), |x, y| {
        let sum = a.get_pixel(x, y)[0] as u16 + b.get_pixel(x, y)[0] as u16;
        Luma([(sum / 2) as u8])
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn preprocessor(width: u32, height: u32, color_averaging: bool) -> ScreenPreprocessor {
        ScreenPreprocessor::new(&EnvironmentSettings {
            screen_width: width,
            screen_height: height,
            color_averaging,
            ..Default::default()
        })
    }

    #[rstest]
    #[case(true, 150)]
    #[case(false, 200)]
    fn test_color_averaging(#[case] color_averaging: bool, #[case] expected: u8) {
        let current = GrayFrame::from_pixel(4, 4, Luma([200]));
        let previous = GrayFrame::from_pixel(4, 4, Luma([100]));
        let frame = preprocessor(4, 4, color_averaging).process(&current, Some(&previous));
        assert!(frame.pixels().all(|p| p[0] == expected));
    }

    #[test]
    fn test_downsample_nearest_keeps_block_values() {
        let screen = GrayFrame::from_fn(8, 8, |x, _| if x < 4 { Luma([0]) } else { Luma([255]) });
        let frame = preprocessor(2, 2, false).process(&screen, None);
        assert_eq!(frame.dimensions(), (2, 2));
        assert_eq!(frame.get_pixel(0, 0)[0], 0);
        assert_eq!(frame.get_pixel(1, 1)[0], 255);
    }

    #[test]
    fn test_processing_is_deterministic() {
        let screen = GrayFrame::from_fn(64, 48, |x, y| Luma([((x * 3 + y * 7) % 256) as u8]));
        let p = preprocessor(84, 84, true);
        assert_eq!(p.process(&screen, None), p.process(&screen, None));
    }
}
