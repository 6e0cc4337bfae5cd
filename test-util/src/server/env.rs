//! Detection of the programs a real server needs.

use std::path::{Path, PathBuf};

use mysqltest::HarnessConfig;
use tracing::debug;
use which::which;

enum BinaryResolution {
    Found(PathBuf),
    Missing,
}

impl BinaryResolution {
    fn resolve(program: &Path) -> Self {
        which(program).map_or(Self::Missing, Self::Found)
    }

    fn log(&self, program: &Path) {
        let (message, resolved) = match self {
            Self::Found(path) => ("found program", Some(path.display().to_string())),
            Self::Missing => ("program not found on PATH", None),
        };
        debug!(program = %program.display(), resolved = ?resolved, "{message}");
    }

    const fn is_found(&self) -> bool { matches!(self, Self::Found(_)) }
}

/// Returns `true` when both the initialization and server programs named by
/// `config` can be executed.
#[must_use]
pub fn mysql_available(config: &HarnessConfig) -> bool {
    [&config.init_binary, &config.server_binary]
        .into_iter()
        .all(|program| {
            let resolution = BinaryResolution::resolve(program);
            resolution.log(program);
            resolution.is_found()
        })
}
