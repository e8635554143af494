use serde::Serialize;
use std::{collections::HashMap, ops};

/// Represents a single tag of an email.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Tag {
    /// Represents the tag as stored by the backend.
    pub name: String,
    /// Represents the display form of the tag, if a transform
    /// applies.
    pub transformed: Option<String>,
    /// Hidden tags are kept but not displayed.
    pub hidden: bool,
}

/// Represents the display rules applied to tags.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TagRules {
    pub hidden: Vec<String>,
    pub transforms: HashMap<String, String>,
}

impl TagRules {
    fn build(&self, name: &str) -> Tag {
        Tag {
            name: name.to_owned(),
            transformed: self.transforms.get(name).cloned(),
            hidden: self.hidden.iter().any(|hidden| hidden == name),
        }
    }
}

/// Represents the ordered list of tags of an email.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Tags(pub Vec<Tag>);

impl Tags {
    /// Builds tags from a space-separated buffer.
    pub fn parse(buf: &str, rules: &TagRules) -> Self {
        let mut tags = Tags::default();
        tags.replace(buf, rules);
        tags
    }

    /// Returns the visible tag names, space-separated.
    pub fn get(&self) -> String {
        self.join(|tag| (!tag.hidden).then(|| tag.name.as_str()))
    }

    /// Returns every tag name, hidden ones included.
    pub fn get_with_hidden(&self) -> String {
        self.join(|tag| Some(tag.name.as_str()))
    }

    /// Returns the visible tags using their transformed form when
    /// there is one.
    pub fn get_transformed(&self) -> String {
        self.join(|tag| {
            (!tag.hidden).then(|| tag.transformed.as_deref().unwrap_or(&tag.name))
        })
    }

    /// Returns the transformed form of the given tag.
    pub fn get_transformed_for(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|tag| tag.name == name)
            .map(|tag| tag.transformed.as_deref().unwrap_or(&tag.name))
    }

    /// Replaces all tags by the ones found in the given buffer.
    /// Returns false when the buffer describes the same tags.
    pub fn replace(&mut self, buf: &str, rules: &TagRules) -> bool {
        let mut next: Vec<Tag> = Vec::new();
        for name in buf.split_whitespace() {
            if !next.iter().any(|tag| tag.name == name) {
                next.push(rules.build(name));
            }
        }

        if next == self.0 {
            return false;
        }

        self.0 = next;
        true
    }

    fn join<'a, F>(&'a self, f: F) -> String
    where
        F: Fn(&'a Tag) -> Option<&'a str>,
    {
        self.iter().filter_map(f).collect::<Vec<_>>().join(" ")
    }
}

impl ops::Deref for Tags {
    type Target = Vec<Tag>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> TagRules {
        TagRules {
            hidden: vec!["unread".into()],
            transforms: HashMap::from_iter([("inbox".into(), "i".into())]),
        }
    }

    #[test]
    fn replace_dedups_and_detects_no_change() {
        let rules = rules();
        let mut tags = Tags::parse("inbox work  inbox", &rules);
        assert_eq!("inbox work", tags.get());
        assert!(!tags.replace("inbox work", &rules));
        assert!(tags.replace("work", &rules));
        assert_eq!("work", tags.get());
    }

    #[test]
    fn hidden_and_transformed_views() {
        let tags = Tags::parse("inbox unread todo", &rules());
        assert_eq!("inbox todo", tags.get());
        assert_eq!("inbox unread todo", tags.get_with_hidden());
        assert_eq!("i todo", tags.get_transformed());
        assert_eq!(Some("i"), tags.get_transformed_for("inbox"));
        assert_eq!(Some("todo"), tags.get_transformed_for("todo"));
        assert_eq!(None, tags.get_transformed_for("missing"));
    }
}
