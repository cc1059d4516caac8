//! Access policies: which targets (usually addresses) may be used.
//!
//! Lists only grow. A whitelist that once restricted targets never turns
//! back into allow-all.

use std::hash::Hash;

use dashmap::DashSet;

/// Decides whether a target is allowed.
pub trait Policy<T>: Send + Sync {
    fn is_allowed(&self, target: &T) -> bool;

    fn is_not_allowed(&self, target: &T) -> bool {
        !self.is_allowed(target)
    }
}

/// Allows everything except the listed targets.
#[derive(Debug)]
pub struct BlackList<T: Eq + Hash> {
    entries: DashSet<T>,
}

/// Allows only the listed targets. An empty list allows everything.
#[derive(Debug)]
pub struct WhiteList<T: Eq + Hash> {
    entries: DashSet<T>,
}

macro_rules! list_ops {
    ($list:ident) => {
        impl<T: Eq + Hash + Clone> $list<T> {
            pub fn new() -> Self {
                Self {
                    entries: DashSet::new(),
                }
            }

            /// Returns false if `target` was already listed.
            pub fn add(&self, target: T) -> bool {
                self.entries.insert(target)
            }

            pub fn contains(&self, target: &T) -> bool {
                self.entries.contains(target)
            }

            pub fn len(&self) -> usize {
                self.entries.len()
            }

            pub fn is_empty(&self) -> bool {
                self.entries.is_empty()
            }

            pub fn to_vec(&self) -> Vec<T> {
                self.entries.iter().map(|e| e.key().clone()).collect()
            }
        }

        impl<T: Eq + Hash + Clone> Default for $list<T> {
            fn default() -> Self {
                Self::new()
            }
        }

        impl<T: Eq + Hash + Clone> FromIterator<T> for $list<T> {
            fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
                let list = Self::new();
                for target in iter {
                    list.add(target);
                }
                list
            }
        }
    };
}

list_ops!(BlackList);
list_ops!(WhiteList);

impl<T: Eq + Hash + Send + Sync> Policy<T> for BlackList<T> {
    fn is_allowed(&self, target: &T) -> bool {
        !self.entries.contains(target)
    }
}

impl<T: Eq + Hash + Send + Sync> Policy<T> for WhiteList<T> {
    fn is_allowed(&self, target: &T) -> bool {
        self.entries.is_empty() || self.entries.contains(target)
    }
}

/// A blacklist and a whitelist; a target must pass both.
#[derive(Debug)]
pub struct AccessPolicy<T: Eq + Hash> {
    pub black_list: BlackList<T>,
    pub white_list: WhiteList<T>,
}

impl<T: Eq + Hash + Clone> AccessPolicy<T> {
    pub fn new(black_list: BlackList<T>, white_list: WhiteList<T>) -> Self {
        Self {
            black_list,
            white_list,
        }
    }
}

impl<T: Eq + Hash + Clone> Default for AccessPolicy<T> {
    fn default() -> Self {
        Self::new(BlackList::new(), WhiteList::new())
    }
}

impl<T: Eq + Hash + Send + Sync> Policy<T> for AccessPolicy<T> {
    fn is_allowed(&self, target: &T) -> bool {
        self.black_list.is_allowed(target) && self.white_list.is_allowed(target)
    }
}
