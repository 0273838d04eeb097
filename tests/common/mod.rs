//! Helpers shared by the integration tests.

/// Four-part version handed to the image builder.
#[derive(Debug, Clone, Copy)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub build: u16,
    pub revision: u16,
}

impl Version {
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Version {
            major,
            minor,
            build,
            revision,
        }
    }
}

#[path = "../../src/loader/fixtures.rs"]
#[allow(dead_code)]
pub mod fixtures;
