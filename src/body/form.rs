use crate::url_template::{FORM, canonicalize};

use super::RequestBody;

/// Accumulates `application/x-www-form-urlencoded` fields.
#[derive(Debug, Clone, Default)]
pub struct FormBody {
    pairs: Vec<(String, String)>,
}

impl FormBody {
    /// An empty form.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field, percent-encoding its name and value.
    pub fn add(&mut self, name: &str, value: &str) {
        self.push(name, value, false);
    }

    /// Adds a field whose name and value are already percent-encoded.
    pub fn add_encoded(&mut self, name: &str, value: &str) {
        self.push(name, value, true);
    }

    fn push(&mut self, name: &str, value: &str, encoded: bool) {
        self.pairs.push((
            canonicalize(name, &FORM, encoded).into_owned(),
            canonicalize(value, &FORM, encoded).into_owned(),
        ));
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether no fields were added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Produces the encoded body.
    #[must_use]
    pub fn build(self) -> RequestBody {
        let content = self
            .pairs
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("&");
        RequestBody::new(Some(mime::APPLICATION_WWW_FORM_URLENCODED), content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_fields_in_order() {
        let mut form = FormBody::new();
        form.add("foo", "bar");
        form.add("kit", "kat & co");
        form.add_encoded("pi%6eg", "po%20ng");
        let body = form.build();
        assert_eq!(body.content().as_ref(), b"foo=bar&kit=kat%20%26%20co&pi%6eg=po%20ng");
        assert_eq!(
            body.content_type(),
            Some(&mime::APPLICATION_WWW_FORM_URLENCODED)
        );
    }

    #[test]
    fn empty_form_has_empty_content() {
        assert_eq!(FormBody::new().build().content_length(), 0);
    }
}
