//! Fractional ordering for list-like entities.
//!
//! Entities carry an `f64` order key. Inserting between two neighbours
//! takes the midpoint, so concurrent inserts never renumber other items.
//! Repeated bisection eventually runs out of precision; at that point
//! [`between`] reports [`OrderError::Exhausted`] and the caller re-spaces
//! the list with [`renormalize`].

use crate::changes::SetOrderChange;
use crate::entity::Entity;
use crate::error::OrderError;
use std::cmp::Ordering;

/// Gap between consecutive items after renormalizing, and the step used
/// when placing an item before the first or after the last one.
pub const ORDER_STRIDE: f64 = 1.0;

/// An entity positioned in a list by a floating-point order key.
pub trait Orderable: Entity {
    fn order(&self) -> f64;

    fn set_order(&mut self, order: f64);
}

/// Rejects order keys that cannot be persisted.
pub fn check_finite(order: f64) -> Result<f64, OrderError> {
    if order.is_finite() {
        Ok(order)
    } else {
        Err(OrderError::NotFinite(order))
    }
}

/// Order key strictly between two neighbours.
///
/// `None` on one side means the list end: the result is one stride past
/// the other neighbour. With no neighbours at all the result is the stride.
pub fn between(before: Option<f64>, after: Option<f64>) -> Result<f64, OrderError> {
    for neighbour in before.iter().chain(after.iter()) {
        check_finite(*neighbour)?;
    }
    match (before, after) {
        (None, None) => Ok(ORDER_STRIDE),
        (Some(before), None) => {
            let next = check_finite(before + ORDER_STRIDE)?;
            if next <= before {
                return Err(OrderError::Exhausted { before, after: next });
            }
            Ok(next)
        }
        (None, Some(after)) => {
            let next = check_finite(after - ORDER_STRIDE)?;
            if next >= after {
                return Err(OrderError::Exhausted { before: next, after });
            }
            Ok(next)
        }
        (Some(before), Some(after)) => {
            if before >= after {
                return Err(OrderError::OutOfOrder { before, after });
            }
            let mid = before + (after - before) / 2.0;
            if !mid.is_finite() || mid <= before || mid >= after {
                return Err(OrderError::Exhausted { before, after });
            }
            Ok(mid)
        }
    }
}

/// List order: by order key, ties broken by entity id so every replica
/// sorts identically.
pub fn compare<T: Orderable>(a: &T, b: &T) -> Ordering {
    a.order()
        .total_cmp(&b.order())
        .then_with(|| a.id().cmp(&b.id()))
}

/// Sorts items into list order.
pub fn sort_ordered<T: Orderable>(items: &mut [T]) {
    items.sort_by(compare);
}

/// Changes that re-space `items` to `ORDER_STRIDE, 2 * ORDER_STRIDE, ...`
/// while keeping their current list order. Items already at their target
/// position get no change.
pub fn renormalize<T: Orderable>(items: &[T]) -> Vec<SetOrderChange<T>> {
    let mut sorted: Vec<&T> = items.iter().collect();
    sorted.sort_by(|a, b| compare(*a, *b));
    sorted
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| {
            let target = (index + 1) as f64 * ORDER_STRIDE;
            (item.order() != target).then(|| SetOrderChange::at(item.id(), target))
        })
        .collect()
}
