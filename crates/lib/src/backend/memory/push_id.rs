//! Time-ordered child keys.
//!
//! A push id is 20 characters: 8 encode the creation time in milliseconds and
//! 12 are random. Ids created within the same millisecond reuse the previous
//! random part incremented by one, so ids of one generator always sort in
//! creation order.

use std::sync::{Arc, Mutex};

use rand::Rng;

use crate::clock::Clock;
use crate::constants::PUSH_CHARS;

const TIME_CHARS: usize = 8;
const RANDOM_CHARS: usize = 12;

#[derive(Debug)]
struct PushState {
    last_time: Option<u64>,
    last_random: [u8; RANDOM_CHARS],
}

/// Generates push ids for one store.
#[derive(Debug)]
pub(super) struct PushIdGenerator {
    clock: Arc<dyn Clock>,
    state: Mutex<PushState>,
}

impl PushIdGenerator {
    pub(super) fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(PushState {
                last_time: None,
                last_random: [0; RANDOM_CHARS],
            }),
        }
    }

    pub(super) fn next_id(&self) -> String {
        let now = self.clock.now_millis();
        let mut state = self.state.lock().unwrap();

        if state.last_time == Some(now) {
            for digit in state.last_random.iter_mut().rev() {
                if *digit == 63 {
                    *digit = 0;
                } else {
                    *digit += 1;
                    break;
                }
            }
        } else {
            let mut rng = rand::thread_rng();
            for digit in state.last_random.iter_mut() {
                *digit = rng.gen_range(0..64);
            }
        }
        state.last_time = Some(now);

        let mut id = String::with_capacity(TIME_CHARS + RANDOM_CHARS);
        let mut time = now;
        let mut time_chars = [0u8; TIME_CHARS];
        for slot in time_chars.iter_mut().rev() {
            *slot = PUSH_CHARS[(time % 64) as usize];
            time /= 64;
        }
        id.extend(time_chars.iter().map(|&c| c as char));
        id.extend(
            state
                .last_random
                .iter()
                .map(|&digit| PUSH_CHARS[digit as usize] as char),
        );
        id
    }
}
