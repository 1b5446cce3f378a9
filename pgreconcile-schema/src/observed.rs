use serde::{Deserialize, Serialize};

/// Live catalog state of one resource. `Absent` is a valid state, not an
/// error: hosts use it to schedule recreation or to treat a delete as done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "state", rename_all = "snake_case")]
pub enum Observed<T> {
    Absent,
    Present(T),
}

impl<T> Observed<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Observed::Absent)
    }

    pub fn is_present(&self) -> bool {
        !self.is_absent()
    }

    pub fn into_present(self) -> Option<T> {
        match self {
            Observed::Present(v) => Some(v),
            Observed::Absent => None,
        }
    }
}

impl<T> From<Option<T>> for Observed<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Observed::Present(v),
            None => Observed::Absent,
        }
    }
}
