//! Production environment: system clock, tokio timers, OS randomness.
//!
//! Nothing here is reproducible. Member identities drawn from it are unique
//! with overwhelming probability, which is all the channel needs from them.

use std::time::Duration;

use fedline_core::Environment;

/// Environment backed by the operating system.
///
/// # Panics
///
/// Panics if the OS RNG fails. Without working randomness member identities
/// could collide, and two processes sharing an identity would corrupt every
/// manifest on the channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure leaves no way to pick a member id");
    }
}
