use std::fmt;

/// Last segment of a device topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    /// Sensor readings
    Data,
    /// Online/offline announcements
    Status,
}

impl TopicKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicKind::Data => "data",
            TopicKind::Status => "status",
        }
    }
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds device topics of the form `{root}/{store_code}/{device}/{kind}`.
///
/// Topics are a pure function of their inputs; uniqueness per device comes from
/// the configured device list, not from anything checked here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    root: String,
    store_code: String,
}

impl TopicScheme {
    pub fn new(root: impl Into<String>, store_code: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            store_code: store_code.into(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn store_code(&self) -> &str {
        &self.store_code
    }

    pub fn topic(&self, device: &str, kind: TopicKind) -> String {
        format!("{}/{}/{}/{}", self.root, self.store_code, device, kind)
    }

    pub fn data(&self, device: &str) -> String {
        self.topic(device, TopicKind::Data)
    }

    pub fn status(&self, device: &str) -> String {
        self.topic(device, TopicKind::Status)
    }
}
