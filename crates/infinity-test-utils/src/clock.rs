//! Clock following tokio's (possibly paused) time.

use chrono::Utc;
use infinity_client::token::Clock;
use std::sync::Arc;

/// Wall-clock time anchored at creation and advanced by tokio time.
///
/// Under `#[tokio::test(start_paused = true)]` the clock only moves when
/// tokio time is advanced, so credential expiry and refresh points line
/// up with `tokio::time::sleep`.
#[must_use]
pub fn paused_clock() -> Clock {
    let origin = Utc::now();
    let start = tokio::time::Instant::now();
    Arc::new(move || {
        origin + chrono::Duration::from_std(start.elapsed()).expect("elapsed fits in chrono")
    })
}
