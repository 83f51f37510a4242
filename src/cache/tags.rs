//! Invalidation tags and write matching.
//!
//! A cached entry carries a [`TagSet`]: per table, a list of [`TagGroup`]s.
//! A write to a table evicts the entry when any group under that table has
//! all of its tags satisfied by a written row. The empty group is the create
//! sentinel and matches every write to its table.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::filter::Value;

/// Value side of a tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagValue {
    /// The column holds exactly this value.
    Exact(Value),
    /// The write changes the column, whatever the value.
    Any,
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(value) => write!(f, "{value}"),
            Self::Any => f.write_str("*"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    pub table: String,
    pub column: String,
    pub value: TagValue,
}

impl Tag {
    pub fn exact(table: impl Into<String>, column: impl Into<String>, value: Value) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            value: TagValue::Exact(value),
        }
    }

    pub fn any(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            value: TagValue::Any,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}={}", self.table, self.column, self.value)
    }
}

/// Conjunction of tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagGroup(Vec<Tag>);

impl TagGroup {
    /// The create sentinel.
    pub fn create() -> Self {
        Self(Vec::new())
    }

    pub fn new(tags: impl IntoIterator<Item = Tag>) -> Self {
        let mut tags: Vec<Tag> = tags.into_iter().collect();
        tags.sort();
        tags.dedup();
        Self(tags)
    }

    pub fn is_create(&self) -> bool {
        self.0.is_empty()
    }

    pub fn tags(&self) -> &[Tag] {
        &self.0
    }

    /// Whether `write` fires this group for one written row.
    fn fires(&self, write: &TableWrite, row: &RowImage) -> bool {
        if self.is_create() {
            return true;
        }
        self.holds(write, row, Image::After)
            || (row.has_previous() && self.holds(write, row, Image::Before))
    }

    fn holds(&self, write: &TableWrite, row: &RowImage, image: Image) -> bool {
        self.0.iter().all(|tag| match &tag.value {
            TagValue::Any => write.changes_column(row, &tag.column),
            TagValue::Exact(expected) => row
                .get(image, &tag.column)
                .is_some_and(|actual| expected.matches(actual)),
        })
    }
}

/// Per-table disjunction of tag groups: the invalidation scope of one entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeMap<String, Vec<TagGroup>>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure `table` is present, even without groups.
    pub fn touch(&mut self, table: &str) {
        self.0.entry(table.to_string()).or_default();
    }

    /// Add a group under `table`; duplicates are ignored.
    pub fn push(&mut self, table: &str, group: TagGroup) {
        let groups = self.0.entry(table.to_string()).or_default();
        if !groups.contains(&group) {
            groups.push(group);
        }
    }

    pub fn groups(&self, table: &str) -> &[TagGroup] {
        self.0.get(table).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn contains_table(&self, table: &str) -> bool {
        self.0.contains_key(table)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `write` invalidates an entry carrying this tag set.
    pub fn is_invalidated_by(&self, write: &TableWrite) -> bool {
        let Some(groups) = self.0.get(&write.table) else {
            return false;
        };
        if write.is_unscoped() {
            return true;
        }
        write
            .rows
            .iter()
            .any(|row| groups.iter().any(|group| group.fires(write, row)))
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (table, groups)) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{table}: [")?;
            for (group_index, group) in groups.iter().enumerate() {
                if group_index > 0 {
                    f.write_str(", ")?;
                }
                f.write_str("[")?;
                for (tag_index, tag) in group.tags().iter().enumerate() {
                    if tag_index > 0 {
                        f.write_str(" & ")?;
                    }
                    write!(f, "{}={}", tag.column, tag.value)?;
                }
                f.write_str("]")?;
            }
            f.write_str("]")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteKind {
    Insert,
    Update,
    Delete,
}

/// Column values of one written row.
///
/// `values` is the full row as it is after an insert or update, or as it was
/// before a delete. `previous` holds the prior values of the columns an
/// update changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowImage {
    pub values: BTreeMap<String, Value>,
    pub previous: BTreeMap<String, Value>,
}

impl RowImage {
    pub fn new<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            values: values.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            previous: BTreeMap::new(),
        }
    }

    /// Record the prior values of changed columns.
    pub fn with_previous<I, K, V>(mut self, previous: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.previous = previous
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    fn has_previous(&self) -> bool {
        !self.previous.is_empty()
    }

    fn get(&self, image: Image, column: &str) -> Option<&Value> {
        match image {
            Image::After => self.values.get(column),
            Image::Before => self
                .previous
                .get(column)
                .or_else(|| self.values.get(column)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Image {
    After,
    Before,
}

/// One write statement against a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableWrite {
    pub table: String,
    pub kind: WriteKind,
    /// Written rows. Empty for statements whose rows are unknown.
    pub rows: Vec<RowImage>,
    /// Columns an update sets, when known without row images.
    pub changed: BTreeSet<String>,
    unscoped: bool,
}

impl TableWrite {
    pub fn insert(table: impl Into<String>, rows: impl IntoIterator<Item = RowImage>) -> Self {
        Self::scoped(table, WriteKind::Insert, rows)
    }

    pub fn update(table: impl Into<String>, rows: impl IntoIterator<Item = RowImage>) -> Self {
        Self::scoped(table, WriteKind::Update, rows)
    }

    pub fn delete(table: impl Into<String>, rows: impl IntoIterator<Item = RowImage>) -> Self {
        Self::scoped(table, WriteKind::Delete, rows)
    }

    /// A statement whose affected rows are unknown; evicts every entry that
    /// carries `table`.
    pub fn unscoped(table: impl Into<String>, kind: WriteKind) -> Self {
        Self {
            table: table.into(),
            kind,
            rows: Vec::new(),
            changed: BTreeSet::new(),
            unscoped: true,
        }
    }

    fn scoped(
        table: impl Into<String>,
        kind: WriteKind,
        rows: impl IntoIterator<Item = RowImage>,
    ) -> Self {
        Self {
            table: table.into(),
            kind,
            rows: rows.into_iter().collect(),
            changed: BTreeSet::new(),
            unscoped: false,
        }
    }

    /// Declare columns an update sets in addition to those with previous values.
    pub fn with_changed<I, C>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        self.changed.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn is_unscoped(&self) -> bool {
        self.unscoped
    }

    fn changes_column(&self, row: &RowImage, column: &str) -> bool {
        match self.kind {
            WriteKind::Insert | WriteKind::Delete => true,
            WriteKind::Update => {
                self.changed.contains(column) || row.previous.contains_key(column)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_group(value: &str) -> TagGroup {
        TagGroup::new([Tag::exact("orders", "status", Value::from(value))])
    }

    fn orders_set(groups: Vec<TagGroup>) -> TagSet {
        let mut set = TagSet::new();
        for group in groups {
            set.push("orders", group);
        }
        set
    }

    #[test]
    fn exact_tag_matches_written_value() {
        let set = orders_set(vec![status_group("active")]);

        let active = TableWrite::update("orders", [RowImage::new([("status", "active")])]);
        let closed = TableWrite::update("orders", [RowImage::new([("status", "closed")])]);

        assert!(set.is_invalidated_by(&active));
        assert!(!set.is_invalidated_by(&closed));
    }

    #[test]
    fn previous_image_fires_for_rows_leaving_the_result() {
        let set = orders_set(vec![status_group("active")]);
        let write = TableWrite::update(
            "orders",
            [RowImage::new([("status", "closed")]).with_previous([("status", "active")])],
        );
        assert!(set.is_invalidated_by(&write));
    }

    #[test]
    fn create_sentinel_matches_any_write() {
        let set = orders_set(vec![TagGroup::create()]);
        let insert = TableWrite::insert("orders", [RowImage::new([("id", 1)])]);
        assert!(set.is_invalidated_by(&insert));

        let other = TableWrite::insert("users", [RowImage::new([("id", 1)])]);
        assert!(!set.is_invalidated_by(&other));
    }

    #[test]
    fn groups_are_conjunctions() {
        let group = TagGroup::new([
            Tag::exact("orders", "status", Value::from("active")),
            Tag::exact("orders", "kind", Value::from("A")),
        ]);
        let set = orders_set(vec![group]);

        let both = TableWrite::insert(
            "orders",
            [RowImage::new([("status", "active"), ("kind", "A")])],
        );
        let one = TableWrite::insert(
            "orders",
            [RowImage::new([("status", "active"), ("kind", "B")])],
        );
        assert!(set.is_invalidated_by(&both));
        assert!(!set.is_invalidated_by(&one));
    }

    #[test]
    fn wildcard_requires_the_column_to_change() {
        let set = orders_set(vec![TagGroup::new([Tag::any("orders", "parent_id")])]);

        let touching = TableWrite::update(
            "orders",
            [RowImage::new([("parent_id", 3)]).with_previous([("parent_id", 2)])],
        );
        let untouched = TableWrite::update(
            "orders",
            [RowImage::new([("parent_id", Value::from(3)), ("name", Value::from("x"))]).with_previous([("name", "y")])],
        );
        let declared = TableWrite::update("orders", [RowImage::new([("parent_id", 3)])])
            .with_changed(["parent_id"]);

        assert!(set.is_invalidated_by(&touching));
        assert!(!set.is_invalidated_by(&untouched));
        assert!(set.is_invalidated_by(&declared));
    }

    #[test]
    fn unscoped_write_evicts_every_entry_of_the_table() {
        let set = orders_set(vec![status_group("active")]);
        assert!(set.is_invalidated_by(&TableWrite::unscoped("orders", WriteKind::Delete)));
        assert!(!set.is_invalidated_by(&TableWrite::unscoped("users", WriteKind::Delete)));
    }

    #[test]
    fn push_ignores_duplicate_groups() {
        let set = orders_set(vec![status_group("a"), status_group("a"), status_group("b")]);
        assert_eq!(set.groups("orders").len(), 2);
    }

    #[test]
    fn display_lists_groups_per_table() {
        let set = orders_set(vec![TagGroup::create(), status_group("active")]);
        assert_eq!(set.to_string(), "orders: [[], [status='active']]");
    }
}
