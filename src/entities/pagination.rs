//! Offset pagination for entity listings
//!
//! Listing endpoints take `startIndex`/`count` and return a plain JSON array.
//! Pages are requested until one comes back short or empty.
//!
//! Includes safety mechanisms:
//! - Maximum iteration limit against a provider that never returns a short page
//! - Empty response detection

use std::future::Future;
use tracing::debug;

use crate::client::RequestResult;
use crate::entities::EntityError;

/// Maximum number of pages fetched for one listing.
pub const MAX_ITERATIONS: usize = 10_000;

/// Fetch every page of a listing.
///
/// `fetch_page(start_index, count)` fetches one page. Pagination ends after
/// the first page shorter than `page_size`.
pub async fn paginate<T, F, Fut>(
    path: &str,
    page_size: usize,
    mut fetch_page: F,
) -> Result<Vec<T>, EntityError>
where
    F: FnMut(usize, usize) -> Fut,
    Fut: Future<Output = RequestResult<Vec<T>>>,
{
    let page_size = page_size.max(1);
    let mut all_items = Vec::new();
    let mut iteration = 0;

    loop {
        if iteration >= MAX_ITERATIONS {
            return Err(EntityError::PaginationLimit {
                path: path.to_string(),
                pages: MAX_ITERATIONS,
            });
        }

        let start_index = all_items.len();
        let page = fetch_page(start_index, page_size).await?;
        let received = page.len();
        iteration += 1;

        debug!(path, page = iteration, start_index, received, "Fetched listing page");
        all_items.extend(page);

        if received < page_size {
            break;
        }
    }

    debug!(
        path,
        pages = iteration,
        total = all_items.len(),
        "Pagination complete"
    );
    Ok(all_items)
}
