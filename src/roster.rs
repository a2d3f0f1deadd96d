use std::collections::HashMap;

use crate::model::Student;

/// Students in load order with an id index.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    students: Vec<Student>,
    by_id: HashMap<String, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterLoad {
    pub count: usize,
    pub dropped: usize,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole roster. Rows with a blank id are dropped and a
    /// repeated id keeps its first occurrence.
    pub fn load(&mut self, students: Vec<Student>) -> RosterLoad {
        let mut kept: Vec<Student> = Vec::with_capacity(students.len());
        let mut by_id: HashMap<String, usize> = HashMap::with_capacity(students.len());
        let mut dropped = 0;
        for mut s in students {
            s.id = s.id.trim().to_string();
            if s.id.is_empty() || by_id.contains_key(&s.id) {
                dropped += 1;
                continue;
            }
            by_id.insert(s.id.clone(), kept.len());
            kept.push(s);
        }
        self.students = kept;
        self.by_id = by_id;
        RosterLoad {
            count: self.students.len(),
            dropped,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Student> {
        self.by_id.get(id).map(|&idx| &self.students[idx])
    }

    pub fn all(&self) -> &[Student] {
        &self.students
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.students.iter().map(|s| s.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn student(id: &str, name: &str, app_number: &str) -> Student {
    Student {
        id: id.to_string(),
        name: name.to_string(),
        app_number: app_number.to_string(),
        active: true,
    }
}
