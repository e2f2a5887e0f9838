use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire-ready encoding of a tag set.
///
/// Fields and values are parallel sequences: `fields[i]` is the tag field
/// whose value is `values[i]`. Fields are sorted so that equal tag sets always
/// encode to equal frames.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTagFrame")]
pub struct TagFrame {
    count: usize,
    fields: Vec<String>,
    values: Vec<String>,
}

impl TagFrame {
    /// Encodes a tag mapping (`&HashMap<String, String>`,
    /// `&BTreeMap<String, String>`, ...).
    pub fn encode<'a, I>(tags: I) -> TagFrame
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let (fields, values): (Vec<String>, Vec<String>) = tags
            .into_iter()
            .sorted_unstable_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(field, value)| (field.clone(), value.clone()))
            .unzip();

        TagFrame { count: fields.len(), fields, values }
    }

    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    #[must_use]
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Iterates `(field, value)` pairs in frame order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .zip(&self.values)
            .map(|(field, value)| (field.as_str(), value.as_str()))
    }
}

#[derive(Deserialize)]
struct RawTagFrame {
    count: usize,
    fields: Vec<String>,
    values: Vec<String>,
}

#[derive(Debug, Error)]
#[error("Tag frame mismatch; count={count}; fields={fields}; values={values}")]
pub struct TagFrameError {
    count: usize,
    fields: usize,
    values: usize,
}

impl TryFrom<RawTagFrame> for TagFrame {
    type Error = TagFrameError;

    fn try_from(RawTagFrame { count, fields, values }: RawTagFrame) -> Result<Self, Self::Error> {
        if fields.len() != count || values.len() != count {
            return Err(TagFrameError { count, fields: fields.len(), values: values.len() });
        }

        Ok(TagFrame { count, fields, values })
    }
}
