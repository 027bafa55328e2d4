//! The persisted graph vocabulary
//!
//! Labels, relationship types and property names are a public contract:
//! other tools query the graph directly. Every name that ends up in query
//! text comes from these enumerations, never from input data.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Node labels written by the adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Label {
    Toolchain,
    Place,
    DataSet,
    PlaceNameDescriptor,
    Country,
    County,
    LocalAuthorityDistrict,
    Source,
    Token,
    Lemma,
    Tag,
    Cluster,
    Entity,
}

impl Label {
    pub const ALL: [Label; 13] = [
        Label::Toolchain,
        Label::Place,
        Label::DataSet,
        Label::PlaceNameDescriptor,
        Label::Country,
        Label::County,
        Label::LocalAuthorityDistrict,
        Label::Source,
        Label::Token,
        Label::Lemma,
        Label::Tag,
        Label::Cluster,
        Label::Entity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Toolchain => "Toolchain",
            Label::Place => "Place",
            Label::DataSet => "DataSet",
            Label::PlaceNameDescriptor => "PlaceNameDescriptor",
            Label::Country => "Country",
            Label::County => "County",
            Label::LocalAuthorityDistrict => "LocalAuthorityDistrict",
            Label::Source => "Source",
            Label::Token => "Token",
            Label::Lemma => "Lemma",
            Label::Tag => "Tag",
            Label::Cluster => "Cluster",
            Label::Entity => "Entity",
        }
    }

    /// The properties that define node identity for merge purposes, in
    /// canonical order.
    pub fn natural_key(&self) -> &'static [Property] {
        use Property::*;
        match self {
            Label::Toolchain => &[Name, Version],
            Label::Place => &[Id, Toolchain],
            Label::DataSet => &[Year, Toolchain],
            Label::PlaceNameDescriptor => &[Code, Toolchain],
            Label::Country => &[Name, Toolchain],
            Label::County | Label::LocalAuthorityDistrict => &[Name, Set, Toolchain],
            Label::Source => &[Title, Url],
            Label::Token => &[Text, Paragraph, Index, Norm, Language, Source],
            Label::Lemma => &[Text, Language],
            Label::Tag => &[Class, Type],
            Label::Cluster => &[Id, Source],
            Label::Entity => &[Text, Type],
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Label::ALL
            .iter()
            .find(|l| l.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown label '{}'", s))
    }
}

/// Relationship types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RelType {
    PartOf,
    Describes,
    Is,
    Homophone,
    Matches,
    Tagged,
    Next,
}

impl RelType {
    pub const ALL: [RelType; 7] = [
        RelType::PartOf,
        RelType::Describes,
        RelType::Is,
        RelType::Homophone,
        RelType::Matches,
        RelType::Tagged,
        RelType::Next,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelType::PartOf => "PartOf",
            RelType::Describes => "Describes",
            RelType::Is => "Is",
            RelType::Homophone => "Homophone",
            RelType::Matches => "Matches",
            RelType::Tagged => "Tagged",
            RelType::Next => "Next",
        }
    }
}

impl fmt::Display for RelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RelType::ALL
            .iter()
            .find(|r| r.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown relationship type '{}'", s))
    }
}

/// Property names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Property {
    /// Node identifier, assigned once at creation
    Uuid,
    CreatedAt,
    Name,
    Version,
    Id,
    Toolchain,
    Year,
    Code,
    Set,
    Title,
    Url,
    Text,
    Paragraph,
    Index,
    Norm,
    Language,
    Class,
    Type,
    Source,
    Lat,
    Lon,
    /// Coarse part-of-speech tag
    Pos,
    /// Fine-grained tag
    Tag,
    Lemma,
    Cluster,
    /// Auxiliary semantic tags
    Musas,
}

impl Property {
    pub fn as_str(&self) -> &'static str {
        match self {
            Property::Uuid => "uuid",
            Property::CreatedAt => "created_at",
            Property::Name => "name",
            Property::Version => "version",
            Property::Id => "id",
            Property::Toolchain => "toolchain",
            Property::Year => "year",
            Property::Code => "code",
            Property::Set => "set",
            Property::Title => "title",
            Property::Url => "url",
            Property::Text => "text",
            Property::Paragraph => "paragraph",
            Property::Index => "index",
            Property::Norm => "norm",
            Property::Language => "language",
            Property::Class => "class",
            Property::Type => "type",
            Property::Source => "source",
            Property::Lat => "lat",
            Property::Lon => "lon",
            Property::Pos => "pos",
            Property::Tag => "tag",
            Property::Lemma => "lemma",
            Property::Cluster => "cluster",
            Property::Musas => "musas",
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag classes stored on `Tag.class`.
pub mod tag_class {
    pub const FINE: &str = "fine";
    pub const COARSE: &str = "coarse";
    pub const PYMUSAS: &str = "pymusas";
}

/// `set` discriminators for County and LocalAuthorityDistrict nodes.
pub mod name_set {
    pub const HISTORIC: &str = "historic";
    pub const Y1961: &str = "1961";
    pub const Y1991: &str = "1991";
    pub const LIEUTENANCY: &str = "lieutenancy";
}

/// Entity type routed to `Homophone` instead of `Is` by the linker.
pub const PERSON: &str = "PERSON";
