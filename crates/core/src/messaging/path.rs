use std::fmt;
use std::str::FromStr;

use crate::error::RelayError;

/// Class tag of a node in the module tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleClass {
    None,
    Root,
    Sender,
    Receiver,
    Audio,
    Data,
    Display,
    Session,
    Control,
}

impl ModuleClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Root => "root",
            Self::Sender => "sender",
            Self::Receiver => "receiver",
            Self::Audio => "audio",
            Self::Data => "data",
            Self::Display => "display",
            Self::Session => "session",
            Self::Control => "control",
        }
    }
}

impl fmt::Display for ModuleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleClass {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "none" => Self::None,
            "root" => Self::Root,
            "sender" => Self::Sender,
            "receiver" => Self::Receiver,
            "audio" => Self::Audio,
            "data" => Self::Data,
            "display" => Self::Display,
            "session" => Self::Session,
            "control" => Self::Control,
            other => return Err(RelayError::InvalidOption(format!("module class '{other}'"))),
        })
    }
}

/// Route from a starting node to a descendant, one class tag per tree level.
///
/// Rendered as dot-separated tags, e.g. `audio.sender`. An empty path
/// addresses the starting node itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MessagePath(Vec<ModuleClass>);

impl MessagePath {
    pub fn new(segments: impl IntoIterator<Item = ModuleClass>) -> Self {
        Self(segments.into_iter().collect())
    }

    pub fn segments(&self) -> &[ModuleClass] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append one level.
    pub fn push(&mut self, class: ModuleClass) {
        self.0.push(class);
    }
}

impl fmt::Display for MessagePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, class) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(class.as_str())?;
        }
        Ok(())
    }
}

impl FromStr for MessagePath {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::default());
        }
        s.split('.').map(str::parse).collect::<Result<Vec<_>, _>>().map(Self)
    }
}
