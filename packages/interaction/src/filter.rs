//! Filter and sort helpers for picking authenticators.

use crate::model::{AuthenticatorInfo, AuthenticatorTag, IdentityInfo};

/// A predicate over items of type `T`.
pub type Predicate<'a, T> = Box<dyn Fn(&T) -> bool + 'a>;

/// Keep the items that satisfy every predicate, preserving order.
pub fn filter<T>(items: impl IntoIterator<Item = T>, predicates: &[Predicate<'_, T>]) -> Vec<T> {
    items
        .into_iter()
        .filter(|item| predicates.iter().all(|keep| keep(item)))
        .collect()
}

pub fn keep_tag<'a>(tag: AuthenticatorTag) -> Predicate<'a, AuthenticatorInfo> {
    Box::new(move |a| a.tag == tag)
}

/// Keep primary authenticators that can authenticate `identity`.
pub fn keep_primary_of_identity(identity: &IdentityInfo) -> Predicate<'_, AuthenticatorInfo> {
    Box::new(move |a| a.tag == AuthenticatorTag::Primary && a.is_bound_to(identity))
}

/// Stable sort by position in `order`.
///
/// Items whose key is in `order` come first, by index. Items whose key is
/// absent keep their relative order after them.
pub fn stable_sort_by_priority<T, K, F>(order: &[K], items: &mut [T], key: F)
where
    K: PartialEq,
    F: Fn(&T) -> K,
{
    items.sort_by_key(|item| {
        let k = key(item);
        order.iter().position(|o| *o == k).unwrap_or(usize::MAX)
    });
}

/// Group items into classes by key, classes ordered by first appearance.
pub fn partition_by<T, K, F>(items: Vec<T>, key: F) -> Vec<(K, Vec<T>)>
where
    K: PartialEq,
    F: Fn(&T) -> K,
{
    let mut classes: Vec<(K, Vec<T>)> = Vec::new();
    for item in items {
        let k = key(&item);
        match classes.iter_mut().find(|(existing, _)| *existing == k) {
            Some((_, members)) => members.push(item),
            None => classes.push((k, vec![item])),
        }
    }
    classes
}
