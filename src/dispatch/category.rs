// SPDX-License-Identifier: Apache-2.0 OR MIT
// Job categories (which thread services a job)

use serde::{Deserialize, Serialize};

/// Job category - decides whether a job runs on the worker pool or on a
/// dedicated thread that drains its category explicitly
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobCategory {
    /// Serviced by the worker pool
    #[default]
    General = 0,
    /// Main thread only
    Main = 1,
    /// Render thread only
    Render = 2,
    /// I/O thread only
    Io = 3,
}

impl JobCategory {
    /// Number of categories (size of per-category tables)
    pub const COUNT: usize = 4;

    pub const ALL: [JobCategory; Self::COUNT] = [
        JobCategory::General,
        JobCategory::Main,
        JobCategory::Render,
        JobCategory::Io,
    ];

    /// Get category code as u8
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Get category name as static string
    pub const fn as_str(self) -> &'static str {
        match self {
            JobCategory::General => "general",
            JobCategory::Main => "main",
            JobCategory::Render => "render",
            JobCategory::Io => "io",
        }
    }

    /// Create from u8 value (None if invalid)
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(JobCategory::General),
            1 => Some(JobCategory::Main),
            2 => Some(JobCategory::Render),
            3 => Some(JobCategory::Io),
            _ => None,
        }
    }

    /// True if pool workers may pick this job up
    pub const fn is_pooled(self) -> bool {
        matches!(self, JobCategory::General)
    }
}

impl std::fmt::Display for JobCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
