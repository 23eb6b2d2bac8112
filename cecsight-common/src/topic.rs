//! Topic construction for per-device state and command keys.
//!
//! Device topics follow the pattern `<base>/<device topic>/<property>`, with
//! remote commands accepted on `<base>/<device topic>/<property>/set`.

/// Default base topic for the CEC bridge.
pub const DEFAULT_BASE_TOPIC: &str = "cecsight/cec";

/// Characters that have a special meaning in Zenoh key expressions.
const RESERVED: [char; 4] = ['*', '$', '?', '#'];

/// Placeholder used when a name sanitizes to nothing.
const EMPTY_SEGMENT: &str = "_";

/// Builder for device topics under a common base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicBuilder {
    base: String,
}

impl TopicBuilder {
    /// Create a builder for the given base topic.
    ///
    /// Leading and trailing slashes are dropped.
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_matches('/').to_string(),
        }
    }

    /// The base topic, without trailing slash.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Build the state topic for a device property.
    ///
    /// # Example
    /// ```
    /// use cecsight_common::topic::TopicBuilder;
    ///
    /// let topics = TopicBuilder::new("cecsight/cec");
    /// assert_eq!(topics.device("Living Room TV", "power"), "cecsight/cec/Living Room TV/power");
    /// ```
    pub fn device(&self, device_topic: &str, property: &str) -> String {
        format!("{}/{}/{}", self.base, sanitize_topic(device_topic), property)
    }

    /// Build the command topic for a device property.
    ///
    /// # Example
    /// ```
    /// use cecsight_common::topic::TopicBuilder;
    ///
    /// let topics = TopicBuilder::new("cecsight/cec/");
    /// assert_eq!(topics.command("tv", "power"), "cecsight/cec/tv/power/set");
    /// ```
    pub fn command(&self, device_topic: &str, property: &str) -> String {
        format!("{}/set", self.device(device_topic, property))
    }
}

impl Default for TopicBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_TOPIC)
    }
}

/// Make a single topic segment safe: no slashes, no reserved characters.
///
/// # Example
/// ```
/// use cecsight_common::topic::sanitize_segment;
///
/// assert_eq!(sanitize_segment("AV/Receiver*"), "AV_Receiver_");
/// assert_eq!(sanitize_segment("  "), "_");
/// ```
pub fn sanitize_segment(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c == '/' || RESERVED.contains(&c) { '_' } else { c })
        .collect();

    if cleaned.is_empty() {
        EMPTY_SEGMENT.to_string()
    } else {
        cleaned
    }
}

/// Make a multi-segment topic safe, keeping its hierarchy.
///
/// Empty segments are dropped so the result never contains `//`.
pub fn sanitize_topic(topic: &str) -> String {
    let segments: Vec<String> = topic
        .split('/')
        .filter(|s| !s.trim().is_empty())
        .map(sanitize_segment)
        .collect();

    if segments.is_empty() {
        EMPTY_SEGMENT.to_string()
    } else {
        segments.join("/")
    }
}

/// Check that a topic can be used verbatim as a key expression.
pub fn is_valid_topic(topic: &str) -> bool {
    !topic.is_empty()
        && !topic.starts_with('/')
        && !topic.ends_with('/')
        && topic.split('/').all(|s| !s.is_empty())
        && !topic.contains(RESERVED)
}
