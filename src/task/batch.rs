//! Ordered batch of tasks.
//!
//! Serialized as a JSON object keyed by task id. Key order is the batch
//! order: earlier tasks may be prerequisites of later ones, and the last task
//! carries the final answer. The (de)serializers walk the object entries in
//! sequence instead of going through a JSON map type, so order survives a
//! round trip through disk.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::task::{Task, TaskError, TaskRecord};

/// Tasks in insertion order with unique ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskBatch {
    tasks: Vec<Task>,
}

impl TaskBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task.
    ///
    /// # Errors
    /// `TaskError::DuplicateId` if a task with the same id exists.
    pub fn push(&mut self, task: Task) -> Result<(), TaskError> {
        if self.get(task.id()).is_some() {
            return Err(TaskError::DuplicateId(task.id().to_string()));
        }
        self.tasks.push(task);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id() == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.tasks.iter_mut()
    }

    pub fn last(&self) -> Option<&Task> {
        self.tasks.last()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Parse a batch from JSON text.
    ///
    /// Decomposition models usually wrap the object in a ```json fence; the
    /// fence is stripped before parsing.
    pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(strip_code_fence(text))
    }
}

impl IntoIterator for TaskBatch {
    type Item = Task;
    type IntoIter = std::vec::IntoIter<Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.into_iter()
    }
}

impl<'a> IntoIterator for &'a TaskBatch {
    type Item = &'a Task;
    type IntoIter = std::slice::Iter<'a, Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.iter()
    }
}

/// Strip one surrounding markdown code fence (```json ... ```), if present.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening line.
    match body.find('\n') {
        Some(newline) => body[newline + 1..].trim(),
        None => body.trim(),
    }
}

impl Serialize for TaskBatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.tasks.len()))?;
        for task in &self.tasks {
            map.serialize_entry(task.id(), &task.to_record())?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TaskBatch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BatchVisitor;

        impl<'de> Visitor<'de> for BatchVisitor {
            type Value = TaskBatch;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping task ids to {description, sql, result}")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<TaskBatch, A::Error> {
                let mut batch = TaskBatch::new();
                while let Some((id, record)) = access.next_entry::<String, TaskRecord>()? {
                    let task = Task::from_record(id, record).map_err(serde::de::Error::custom)?;
                    batch.push(task).map_err(serde::de::Error::custom)?;
                }
                Ok(batch)
            }
        }

        deserializer.deserialize_map(BatchVisitor)
    }
}
