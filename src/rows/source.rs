//! The host side of row binding: what the embedding list exposes.

use crate::cache::locator::Locator;

/// Implemented by the screen that owns the list.
///
/// The coordinator only keeps a weak reference; when the host is dropped,
/// sweeps become no-ops and `bind_row` returns `false`.
pub trait RowSource<R, A>: Send + Sync {
    /// Locator the row currently shows, if it shows an asset at all.
    fn locator_for(&self, row: &R) -> Option<Locator>;

    /// Rows currently on screen.
    fn visible_rows(&self) -> Vec<R>;

    /// Optional transformation of a freshly loaded asset (scaling, cropping).
    ///
    /// A returned replacement is cached under the same locator in place of
    /// the original and delivered to the row.
    fn post_process(&self, _row: &R, _asset: &A) -> Option<A> {
        None
    }
}
