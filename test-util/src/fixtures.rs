//! `rstest` fixtures shared by integration tests.

// Note: The rstest #[fixture] macro generates sibling items that cannot be
// individually annotated, requiring this module-level suppression.
#![expect(
    missing_docs,
    reason = "rstest #[fixture] macro generates undocumented helper items"
)]

use mysqltest::HarnessConfig;
use rstest::fixture;

use crate::{OrFatal, Panic};

/// Configuration from defaults, `mysqltest.toml`, and `MYSQLTEST_*`.
#[fixture]
pub fn harness_config() -> HarnessConfig { HarnessConfig::load().or_fatal(&Panic) }

/// Fakes that initialize and become ready.
#[cfg(unix)]
#[fixture]
pub fn fake_mysql() -> crate::fake::FakeMysql { crate::fake::FakeMysql::healthy().or_fatal(&Panic) }
