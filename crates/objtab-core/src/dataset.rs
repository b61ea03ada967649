//! Instance graph.
//!
//! A `Dataset` is an arena of instances addressed by `InstanceId`. Relationship
//! values are ids into the same arena, so cyclic graphs need no shared
//! ownership. Relationship values live on the declaring side only; the inverse
//! side is derived on demand with `referrers`.

use std::collections::BTreeMap;
use std::ops::{Index, IndexMut};

use crate::schema::Schema;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(usize);

impl InstanceId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Related {
    One(Option<InstanceId>),
    Many(Vec<InstanceId>),
}

impl Related {
    pub fn ids(&self) -> Vec<InstanceId> {
        match self {
            Related::One(id) => id.iter().copied().collect(),
            Related::Many(ids) => ids.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Related::One(id) => id.is_none(),
            Related::Many(ids) => ids.is_empty(),
        }
    }

    /// Rewrite every id through `f`, keeping the shape (single vs collection).
    pub fn try_map<E>(
        &self,
        mut f: impl FnMut(InstanceId) -> Result<InstanceId, E>,
    ) -> Result<Related, E> {
        Ok(match self {
            Related::One(None) => Related::One(None),
            Related::One(Some(id)) => Related::One(Some(f(*id)?)),
            Related::Many(ids) => {
                Related::Many(ids.iter().map(|id| f(*id)).collect::<Result<_, _>>()?)
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    model: String,
    values: BTreeMap<String, Value>,
    relations: BTreeMap<String, Related>,
}

impl Instance {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            values: BTreeMap::new(),
            relations: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, attribute: &str, value: Value) -> Self {
        self.set_value(attribute, value);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn value(&self, attribute: &str) -> Option<&Value> {
        self.values.get(attribute)
    }

    pub fn set_value(&mut self, attribute: &str, value: Value) {
        self.values.insert(attribute.to_string(), value);
    }

    pub fn clear_value(&mut self, attribute: &str) -> Option<Value> {
        self.values.remove(attribute)
    }

    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn related(&self, attribute: &str) -> Option<&Related> {
        self.relations.get(attribute)
    }

    pub fn set_related(&mut self, attribute: &str, related: Related) {
        self.relations.insert(attribute.to_string(), related);
    }

    pub fn relations(&self) -> impl Iterator<Item = (&str, &Related)> {
        self.relations.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Targets of a relationship attribute (empty when unset).
    pub fn targets(&self, attribute: &str) -> Vec<InstanceId> {
        self.related(attribute).map(Related::ids).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    instances: Vec<Instance>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, instance: Instance) -> InstanceId {
        self.instances.push(instance);
        InstanceId(self.instances.len() - 1)
    }

    pub fn get(&self, id: InstanceId) -> Option<&Instance> {
        self.instances.get(id.0)
    }

    pub fn get_mut(&mut self, id: InstanceId) -> Option<&mut Instance> {
        self.instances.get_mut(id.0)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (InstanceId, &Instance)> {
        self.instances
            .iter()
            .enumerate()
            .map(|(i, inst)| (InstanceId(i), inst))
    }

    pub fn ids(&self) -> impl Iterator<Item = InstanceId> {
        (0..self.instances.len()).map(InstanceId)
    }

    pub fn ids_of<'a>(&'a self, model: &'a str) -> impl Iterator<Item = InstanceId> + 'a {
        self.iter()
            .filter(move |(_, inst)| inst.model == model)
            .map(|(id, _)| id)
    }

    pub fn count_of(&self, model: &str) -> usize {
        self.instances.iter().filter(|i| i.model == model).count()
    }

    /// Instance counts per model, sorted by model name.
    pub fn counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for inst in &self.instances {
            *counts.entry(inst.model.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// Value of the model's primary attribute, if the model has one and it is set.
    pub fn primary_key(&self, schema: &Schema, id: InstanceId) -> Option<&str> {
        let inst = self.get(id)?;
        let primary = schema.model(&inst.model)?.primary_attribute()?;
        inst.value(&primary.name)?.as_str()
    }

    pub fn find_by_primary_key(&self, schema: &Schema, model: &str, key: &str) -> Option<InstanceId> {
        self.ids_of(model)
            .find(|id| self.primary_key(schema, *id) == Some(key))
    }

    /// Instances whose `attribute` (declared on `model`) points at `target`.
    pub fn referrers(&self, model: &str, attribute: &str, target: InstanceId) -> Vec<InstanceId> {
        self.iter()
            .filter(|(_, inst)| inst.model == model)
            .filter(|(_, inst)| inst.targets(attribute).contains(&target))
            .map(|(id, _)| id)
            .collect()
    }

    /// Human-readable handle for messages: `Model 'key'` or `Model #index`.
    pub fn describe(&self, schema: &Schema, id: InstanceId) -> String {
        match (self.get(id), self.primary_key(schema, id)) {
            (Some(inst), Some(key)) => format!("{} '{key}'", inst.model),
            (Some(inst), None) => format!("{} #{}", inst.model, id.0),
            (None, _) => format!("#{}", id.0),
        }
    }
}

impl Index<InstanceId> for Dataset {
    type Output = Instance;

    fn index(&self, id: InstanceId) -> &Instance {
        &self.instances[id.0]
    }
}

impl IndexMut<InstanceId> for Dataset {
    fn index_mut(&mut self, id: InstanceId) -> &mut Instance {
        &mut self.instances[id.0]
    }
}
