// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::time::Duration;

use tokio::sync::Notify;

const MAX_DELAY_SECS: u64 = 300;

/// Cubic backoff: `delay(errors) = min(errors^3 - 1, 300)`, clamped to zero
/// for errors in {0, 1} (spec §8: no delay, no metric, until the second
/// consecutive failure).
pub fn delay_seconds(errors: u32) -> u64 {
    let cubed = (errors as u64).saturating_pow(3);
    cubed.saturating_sub(1).min(MAX_DELAY_SECS)
}

/// Sleeps for `delay_seconds(errors)`, waking early if `stop` is notified.
/// Returns `true` if the sleep ran to completion, `false` if interrupted.
pub async fn delay_start(errors: u32, stop: &Notify) -> bool {
    let secs = delay_seconds(errors);
    if secs == 0 {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(secs)) => true,
        _ = stop.notified() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_values_match_spec() {
        assert_eq!(delay_seconds(0), 0);
        assert_eq!(delay_seconds(1), 0);
        assert_eq!(delay_seconds(2), 7);
        assert_eq!(delay_seconds(7), 300);
        assert_eq!(delay_seconds(8), 300);
        assert_eq!(delay_seconds(100), 300);
    }

    #[tokio::test]
    async fn delay_start_returns_true_on_completion() {
        assert!(delay_start(0, &Notify::new()).await);
    }

    #[tokio::test]
    async fn delay_start_returns_false_on_interrupt() {
        let stop = Notify::new();
        stop.notify_one();
        assert!(!delay_start(2, &stop).await);
    }
}
