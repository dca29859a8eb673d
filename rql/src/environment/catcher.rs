use image::Luma;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::environment::Emulator;
use crate::prelude::{ActionIndex, GrayFrame};

const SCREEN_SIZE: i32 = 64;
const PADDLE_WIDTH: i32 = 12;
const PADDLE_HEIGHT: i32 = 3;
const PADDLE_Y: i32 = SCREEN_SIZE - 4;
const PADDLE_SPEED: i32 = 2;
const FRUIT_SIZE: i32 = 4;
const FRUIT_SPEED: i32 = 1;
const INITIAL_LIVES: u32 = 3;

const PADDLE_COLOR: u8 = 255;
const FRUIT_COLOR: u8 = 160;

/// A lightweight 2D game: a paddle at the bottom catches fruit falling from the top.
///
/// - actions: `0` no-op, `1` move left, `2` move right
/// - reward: `+1` for each caught fruit, `-1` for each missed fruit
/// - each missed fruit costs one life, the game is over when all three lives are lost
pub struct Catcher {
    rng: StdRng,
    paddle_x: i32,
    fruit_x: i32,
    fruit_y: i32,
    lives: u32,
}

impl Catcher {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut catcher = Self {
            rng,
            paddle_x: 0,
            fruit_x: 0,
            fruit_y: 0,
            lives: INITIAL_LIVES,
        };
        catcher.reset_game();
        catcher
    }

    fn spawn_fruit(&mut self) {
        self.fruit_x = self.rng.gen_range(0..=SCREEN_SIZE - FRUIT_SIZE);
        self.fruit_y = 0;
    }

    fn fruit_caught(&self) -> bool {
        let fruit_center = self.fruit_x + FRUIT_SIZE / 2;
        let paddle_center = self.paddle_x + PADDLE_WIDTH / 2;
        (fruit_center - paddle_center).abs() <= (PADDLE_WIDTH + FRUIT_SIZE) / 2
    }
}

impl Emulator for Catcher {
    fn action_count(&self) -> usize {
        3
    }

    fn act(&mut self, action: ActionIndex) -> f32 {
        if self.game_over() {
            return 0.0;
        }
        let dx = match action {
            1 => -PADDLE_SPEED,
            2 => PADDLE_SPEED,
            _ => 0,
        };
        self.paddle_x = (self.paddle_x + dx).clamp(0, SCREEN_SIZE - PADDLE_WIDTH);
        self.fruit_y += FRUIT_SPEED;

        if self.fruit_y + FRUIT_SIZE < PADDLE_Y {
            return 0.0;
        }
        let reward = if self.fruit_caught() {
            1.0
        } else {
            self.lives -= 1;
            -1.0
        };
        self.spawn_fruit();
        reward
    }

    fn lives(&self) -> u32 {
        self.lives
    }

    fn game_over(&self) -> bool {
        self.lives == 0
    }

    fn reset_game(&mut self) {
        self.lives = INITIAL_LIVES;
        self.paddle_x = (SCREEN_SIZE - PADDLE_WIDTH) / 2;
        self.spawn_fruit();
    }

    fn screen(&self) -> GrayFrame {
        let mut frame = GrayFrame::new(SCREEN_SIZE as u32, SCREEN_SIZE as u32);
        let mut fill = |x0: i32, y0: i32, w: i32, h: i32, color: u8| {
            for y in y0.max(0)..(y0 + h).min(SCREEN_SIZE) {
                for x in x0.max(0)..(x0 + w).min(SCREEN_SIZE) {
                    frame.put_pixel(x as u32, y as u32, Luma([color]));
                }
            }
        };
        fill(self.fruit_x, self.fruit_y, FRUIT_SIZE, FRUIT_SIZE, FRUIT_COLOR);
        fill(self.paddle_x, PADDLE_Y, PADDLE_WIDTH, PADDLE_HEIGHT, PADDLE_COLOR);
        frame
    }
}
