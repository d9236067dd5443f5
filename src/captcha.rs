//! One-shot numeric challenges gating uploads.
//!
//! The solution only ever leaves this module as a distorted PNG; no
//! response carries it as text.

use crate::constants::{CAPTCHA_DIGITS, CAPTCHA_HEIGHT, CAPTCHA_WIDTH};
use ::captcha::filters::{Dots, Noise, Wave};
use ::captcha::Captcha;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;
use subtle::ConstantTimeEq;

#[derive(Debug)]
struct Challenge {
    solution: String,
    issued_at: i64,
}

#[derive(Debug)]
pub struct CaptchaStore {
    enabled: bool,
    ttl_secs: i64,
    challenges: Mutex<HashMap<String, Challenge>>,
}

impl CaptchaStore {
    pub fn new(enabled: bool, ttl: Duration) -> Self {
        Self {
            enabled,
            ttl_secs: i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX),
            challenges: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Challenge>> {
        self.challenges.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_live(&self, challenge: &Challenge, now: i64) -> bool {
        now.saturating_sub(challenge.issued_at) < self.ttl_secs
    }

    /// Issues a new challenge and returns its id.
    pub fn issue(&self, now: i64) -> String {
        let mut rng = rand::thread_rng();
        let glyphs = alphabet();
        let solution: String = (0..CAPTCHA_DIGITS)
            .filter_map(|_| glyphs.choose(&mut rng).copied())
            .collect();
        let id = uuid::Uuid::new_v4().simple().to_string();

        self.lock().insert(
            id.clone(),
            Challenge {
                solution,
                issued_at: now,
            },
        );
        id
    }

    /// Expected answer of a live challenge, for rendering it.
    pub fn solution(&self, id: &str, now: i64) -> Option<String> {
        self.lock()
            .get(id)
            .filter(|c| self.is_live(c, now))
            .map(|c| c.solution.clone())
    }

    /// Checks an answer. A challenge can be tried once; it is consumed
    /// whether or not the answer matches. Always passes when disabled.
    pub fn verify(&self, id: &str, answer: &str, now: i64) -> bool {
        if !self.enabled {
            return true;
        }

        let Some(challenge) = self.lock().remove(id) else {
            return false;
        };
        if !self.is_live(&challenge, now) {
            return false;
        }

        let answer: String = answer.chars().filter(|c| !c.is_whitespace()).collect();
        !challenge.solution.is_empty()
            && bool::from(answer.as_bytes().ct_eq(challenge.solution.as_bytes()))
    }

    /// Drops unanswered challenges past their lifetime.
    pub fn purge_expired(&self, now: i64) -> usize {
        let mut challenges = self.lock();
        let before = challenges.len();
        challenges.retain(|_, c| now.saturating_sub(c.issued_at) < self.ttl_secs);
        before - challenges.len()
    }
}

/// Glyphs challenges are drawn from: the digits the renderer's font has.
fn alphabet() -> &'static [char] {
    static ALPHABET: OnceLock<Vec<char>> = OnceLock::new();
    ALPHABET.get_or_init(|| {
        Captcha::new()
            .supported_chars()
            .into_iter()
            .filter(char::is_ascii_digit)
            .collect()
    })
}

/// Draws a solution as a PNG with fresh noise and distortion on every call.
/// CPU bound; run it off the async workers.
pub fn render(solution: &str) -> Option<Vec<u8>> {
    let mut image = Captcha::new();
    for glyph in solution.chars() {
        image.set_chars(&[glyph]).add_char();
    }
    image
        .apply_filter(Noise::new(0.2))
        .apply_filter(Wave::new(2.0, 12.0).horizontal())
        .view(CAPTCHA_WIDTH, CAPTCHA_HEIGHT)
        .apply_filter(Dots::new(10));
    image.as_png()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> CaptchaStore {
        CaptchaStore::new(true, Duration::from_secs(60))
    }

    #[test]
    fn correct_answer_passes_once() {
        let captcha = store();
        let id = captcha.issue(0);
        let digits = captcha.solution(&id, 1).unwrap();
        assert_eq!(digits.len(), CAPTCHA_DIGITS);

        assert!(captcha.verify(&id, &digits, 2));
        assert!(!captcha.verify(&id, &digits, 3));
    }

    #[test]
    fn wrong_answer_consumes_the_challenge() {
        let captcha = store();
        let id = captcha.issue(0);
        let digits = captcha.solution(&id, 0).unwrap();

        assert!(!captcha.verify(&id, "not-it", 1));
        assert!(!captcha.verify(&id, &digits, 1));
    }

    #[test]
    fn whitespace_in_answer_is_ignored() {
        let captcha = store();
        let id = captcha.issue(0);
        let digits = captcha.solution(&id, 0).unwrap();
        let spaced = format!(" {} {} ", &digits[..3], &digits[3..]);

        assert!(captcha.verify(&id, &spaced, 1));
    }

    #[test]
    fn expired_challenges_fail_and_are_purged() {
        let captcha = store();
        let stale = captcha.issue(0);
        let fresh = captcha.issue(50);

        assert!(captcha.solution(&stale, 60).is_none());
        assert_eq!(captcha.purge_expired(60), 1);
        assert!(captcha.solution(&fresh, 60).is_some());

        let digits = captcha.solution(&fresh, 60).unwrap();
        assert!(!captcha.verify(&fresh, &digits, 110));
    }

    #[test]
    fn challenges_use_drawable_digits() {
        let captcha = store();
        let id = captcha.issue(0);
        let digits = captcha.solution(&id, 0).unwrap();

        assert_eq!(digits.chars().count(), CAPTCHA_DIGITS);
        assert!(digits.chars().all(|c| alphabet().contains(&c)));
    }

    #[test]
    fn rendered_challenge_is_a_png_without_the_answer() {
        let answer: String = alphabet().iter().cycle().take(CAPTCHA_DIGITS).collect();
        let png = render(&answer).unwrap();

        assert!(png.starts_with(b"\x89PNG\r\n\x1a\n"));
        assert!(!png
            .windows(answer.len())
            .any(|w| w == answer.as_bytes()));
    }

    #[test]
    fn empty_answer_never_passes() {
        let captcha = store();
        let id = captcha.issue(0);
        assert!(!captcha.verify(&id, "   ", 1));
    }

    #[test]
    fn disabled_gate_accepts_anything() {
        let captcha = CaptchaStore::new(false, Duration::from_secs(60));
        assert!(captcha.verify("missing", "", 0));
    }
}
