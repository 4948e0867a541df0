//! # Topic Names
//!
//! Topic names are dot-separated segments (`"order.created"`). Every name
//! carries an implied trailing wildcard: a subscription to `"order"` also
//! receives `"order.created"`. An empty segment is a positional wildcard
//! (`"order..shipped"`, `".created"`), and a segment may be refined with
//! dash-separated sub-topics (`"created-urgent"`), where a subscription to a
//! sub-topic prefix matches every longer refinement.
//!
//! Segment characters are restricted to alphanumerics and `_`.

use crate::error::BusError;
use serde::{Deserialize, Serialize};

/// Separates topic segments.
pub const SEGMENT_SEPARATOR: char = '.';

/// Separates sub-topic fragments inside one segment.
pub const SUB_TOPIC_SEPARATOR: char = '-';

/// Literal marker a request topic must carry at the end of its first segment.
pub const REQUEST_SUFFIX: &str = "Request";

/// Delivery priority of a subscription.
///
/// Compared lexicographically: literal segment count first, sub-topic
/// refinements second. Higher weights are delivered first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Weight {
    /// Number of non-wildcard segments.
    pub segments: usize,
    /// Number of sub-topic refinements across those segments.
    pub sub_segments: usize,
}

impl Weight {
    /// Compute the weight of a subscription topic.
    #[must_use]
    pub fn of(topic: &str) -> Self {
        topic
            .split(SEGMENT_SEPARATOR)
            .filter(|segment| !segment.is_empty())
            .fold(Self::default(), |weight, segment| Self {
                segments: weight.segments + 1,
                sub_segments: weight.sub_segments + segment.split(SUB_TOPIC_SEPARATOR).count() - 1,
            })
    }
}

/// Validate a topic used for subscribing. Wildcard (empty) segments are allowed.
pub fn validate_subscription_topic(topic: &str) -> Result<(), BusError> {
    for segment in topic.split(SEGMENT_SEPARATOR) {
        if !segment.is_empty() {
            validate_segment(topic, segment)?;
        }
    }
    Ok(())
}

/// Validate a topic used for publishing. Published names must be concrete.
pub fn validate_published_topic(topic: &str) -> Result<(), BusError> {
    if topic.is_empty() {
        return Err(BusError::invalid("published topic must not be empty"));
    }
    for (position, segment) in topic.split(SEGMENT_SEPARATOR).enumerate() {
        if segment.is_empty() {
            return Err(BusError::invalid(format!(
                "published topic {topic:?} has an empty segment at position {position}"
            )));
        }
        validate_segment(topic, segment)?;
    }
    Ok(())
}

fn validate_segment(topic: &str, segment: &str) -> Result<(), BusError> {
    for part in segment.split(SUB_TOPIC_SEPARATOR) {
        if part.is_empty() {
            return Err(BusError::invalid(format!(
                "topic {topic:?} has an empty sub-topic in segment {segment:?}"
            )));
        }
        if let Some(ch) = part.chars().find(|ch| !ch.is_alphanumeric() && *ch != '_') {
            return Err(BusError::invalid(format!(
                "topic {topic:?} contains invalid character {ch:?}"
            )));
        }
    }
    Ok(())
}

/// Prefixes of a segment along its sub-topic boundaries, longest first.
///
/// `"a-b-c"` yields `"a-b-c"`, `"a-b"`, `"a"`.
pub(crate) fn sub_topic_prefixes(segment: &str) -> impl Iterator<Item = &str> {
    let cuts = segment
        .match_indices(SUB_TOPIC_SEPARATOR)
        .map(|(index, _)| index)
        .rev();
    std::iter::once(segment).chain(cuts.map(move |index| &segment[..index]))
}

/// Companion topics derived from a `<verb>Request` topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTopics {
    pub request: String,
    pub will: String,
    pub did: String,
}

impl RequestTopics {
    /// Derive `will<Verb>` and `did<Verb>` from a request topic.
    ///
    /// The first segment must end in `Request` with at least one character
    /// before it. Qualifier segments after the first are carried over:
    /// `saveRequest.doc` yields `willSave.doc` and `didSave.doc`.
    pub fn derive(topic: &str) -> Result<Self, BusError> {
        let (head, qualifier) = match topic.find(SEGMENT_SEPARATOR) {
            Some(index) => topic.split_at(index),
            None => (topic, ""),
        };
        let verb = head
            .strip_suffix(REQUEST_SUFFIX)
            .filter(|verb| !verb.is_empty())
            .ok_or_else(|| {
                BusError::invalid(format!(
                    "request topic {topic:?} must end its first segment with {REQUEST_SUFFIX:?}"
                ))
            })?;
        if qualifier == "." {
            return Err(BusError::invalid(format!(
                "request topic {topic:?} has an empty qualifier"
            )));
        }

        let mut chars = verb.chars();
        let verb: String = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        };

        Ok(Self {
            request: topic.to_string(),
            will: format!("will{verb}{qualifier}"),
            did: format!("did{verb}{qualifier}"),
        })
    }
}
