use crate::service::EntityKind;
use serde_json::Value;

/// Per-entity-type cache of the last successfully fetched arrays. The four
/// collections are independent; a failed refresh of one never touches the
/// others, and a collection is only ever replaced whole.
#[derive(Debug, Default)]
pub struct EntityCache {
    jobs: Vec<Value>,
    properties: Vec<Value>,
    people: Vec<Value>,
    opportunities: Vec<Value>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: EntityKind) -> &[Value] {
        match kind {
            EntityKind::Jobs => &self.jobs,
            EntityKind::Properties => &self.properties,
            EntityKind::People => &self.people,
            EntityKind::Opportunities => &self.opportunities,
        }
    }

    pub fn is_empty(&self, kind: EntityKind) -> bool {
        self.get(kind).is_empty()
    }

    pub fn replace(&mut self, kind: EntityKind, records: Vec<Value>) {
        match kind {
            EntityKind::Jobs => self.jobs = records,
            EntityKind::Properties => self.properties = records,
            EntityKind::People => self.people = records,
            EntityKind::Opportunities => self.opportunities = records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collections_are_independent() {
        let mut cache = EntityCache::new();
        cache.replace(EntityKind::Jobs, vec![json!({"id": 1})]);
        cache.replace(EntityKind::People, vec![json!({"id": 2}), json!({"id": 3})]);

        assert_eq!(cache.get(EntityKind::Jobs).len(), 1);
        assert_eq!(cache.get(EntityKind::People).len(), 2);
        assert!(cache.is_empty(EntityKind::Properties));
        assert!(cache.is_empty(EntityKind::Opportunities));

        cache.replace(EntityKind::Jobs, Vec::new());
        assert!(cache.is_empty(EntityKind::Jobs));
        assert_eq!(cache.get(EntityKind::People).len(), 2);
    }
}
