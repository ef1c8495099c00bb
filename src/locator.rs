use crate::types::{Category, ResourceReference};
use kuchiki::iter::NodeIterator;
use kuchiki::NodeRef;

/// Finds the values of one attribute across every tag of one kind.
///
/// Each call to [`values`](Self::values) walks the tree afresh, so the
/// sequence can be restarted at will. Values are returned exactly as written;
/// resolving and deduplicating is left to the caller.
pub struct ResourceLocator<'a> {
    document: &'a NodeRef,
    tag: &'static str,
    attribute: &'static str,
}

impl<'a> ResourceLocator<'a> {
    pub fn new(document: &'a NodeRef, tag: &'static str, attribute: &'static str) -> Self {
        Self {
            document,
            tag,
            attribute,
        }
    }

    pub fn for_category(document: &'a NodeRef, category: Category) -> Option<Self> {
        let (tag, attribute) = category.selector()?;
        Some(Self::new(document, tag, attribute))
    }

    pub fn values(&self) -> impl Iterator<Item = String> + 'a {
        let tag = self.tag;
        let attribute = self.attribute;
        self.document
            .descendants()
            .elements()
            .filter(move |element| &*element.name.local == tag)
            .filter_map(move |element| {
                let attributes = element.attributes.borrow();
                attributes.get(attribute).map(str::to_owned)
            })
    }

    pub fn references(&self, category: Category) -> impl Iterator<Item = ResourceReference> + 'a {
        let tag = self.tag;
        let attribute = self.attribute;
        self.values().map(move |original| ResourceReference {
            tag,
            attribute,
            original,
            category,
        })
    }

    /// Replaces attribute values in place. `replacement` sees each current
    /// value and returns the new one, or `None` to leave it untouched.
    /// Returns the number of attributes changed.
    pub fn rewrite<F>(&self, mut replacement: F) -> usize
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut rewritten = 0;
        for element in self.document.descendants().elements() {
            if &*element.name.local != self.tag {
                continue;
            }
            let mut attributes = element.attributes.borrow_mut();
            let new_value = match attributes.get(self.attribute) {
                Some(current) => replacement(current),
                None => continue,
            };
            if let Some(new_value) = new_value {
                attributes.insert(self.attribute, new_value);
                rewritten += 1;
            }
        }
        rewritten
    }

    /// Drops the attribute from every matching tag. Returns how many were
    /// removed.
    pub fn strip(&self) -> usize {
        let mut removed = 0;
        for element in self.document.descendants().elements() {
            if &*element.name.local != self.tag {
                continue;
            }
            if element.attributes.borrow_mut().remove(self.attribute).is_some() {
                removed += 1;
            }
        }
        removed
    }
}
