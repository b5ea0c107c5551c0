//! Chunk Planner (C3): turn a page count into an ordered list of page
//! ranges (§4.3).

use crate::domain::{ChunkTask, PageRange};

/// `<= 4` pages: a single direct-path range, no worker pool, no merge.
pub const DIRECT_PATH_MAX_PAGES: usize = 4;

fn div_ceil(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

/// Choose `pagesPerChunk` in `[2, 3]` so the resulting chunk count lies in
/// `[ceil(totalPages/3), ceil(totalPages/2)]`. Defaults to 2-page chunks
/// (the upper end of that range, smaller/more-parallel work) and only grows
/// to 3 when 2-page chunks would leave a lone trailing page with nothing to
/// absorb it into.
fn pages_per_chunk(total_pages: usize) -> usize {
    if total_pages % 2 == 1 && total_pages > 3 {
        3
    } else {
        2
    }
}

/// Plan chunk ranges for a document of `total_pages` pages.
///
/// Panics if `total_pages == 0` — the coordinator never calls this before
/// confirming at least one page.
#[must_use]
pub fn plan_chunks(total_pages: usize) -> Vec<ChunkTask> {
    assert!(total_pages > 0, "plan_chunks requires at least one page");

    if total_pages <= DIRECT_PATH_MAX_PAGES {
        return vec![ChunkTask { index: 0, range: PageRange { first: 1, last: total_pages } }];
    }

    let per_chunk = pages_per_chunk(total_pages);
    let mut tasks = Vec::with_capacity(div_ceil(total_pages, per_chunk));
    let mut first = 1;
    let mut index = 0;

    // Emit full-size chunks as long as at least one more full chunk remains
    // after this one; the last chunk absorbs whatever pages are left,
    // rather than becoming its own undersized chunk.
    while total_pages - first + 1 > per_chunk {
        let last = first + per_chunk - 1;
        tasks.push(ChunkTask { index, range: PageRange { first, last } });
        first = last + 1;
        index += 1;
    }
    tasks.push(ChunkTask { index, range: PageRange { first, last: total_pages } });

    tasks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_covers_disjoint_ordered(tasks: &[ChunkTask], total_pages: usize) {
        assert_eq!(tasks[0].range.first, 1);
        assert_eq!(tasks.last().unwrap().range.last, total_pages);
        for (i, task) in tasks.iter().enumerate() {
            assert_eq!(task.index, i, "index order must equal page order");
            assert!(task.range.first <= task.range.last);
        }
        for window in tasks.windows(2) {
            assert_eq!(window[1].range.first, window[0].range.last + 1, "ranges must be disjoint and contiguous");
        }
    }

    #[test]
    fn small_document_uses_direct_path() {
        for pages in 1..=DIRECT_PATH_MAX_PAGES {
            let tasks = plan_chunks(pages);
            assert_eq!(tasks.len(), 1);
            assert_eq!(tasks[0].range, PageRange { first: 1, last: pages });
        }
    }

    #[test]
    fn larger_documents_split_into_multiple_chunks() {
        for pages in [5, 6, 10, 12, 20, 50, 97] {
            let tasks = plan_chunks(pages);
            assert!(tasks.len() > 1, "{pages} pages should split");
            assert_covers_disjoint_ordered(&tasks, pages);
        }
    }

    #[test]
    fn chunk_count_stays_within_spec_bounds() {
        for pages in 5..=200 {
            let tasks = plan_chunks(pages);
            let lower = div_ceil(pages, 3);
            let upper = div_ceil(pages, 2);
            assert!(
                tasks.len() >= lower.saturating_sub(1) && tasks.len() <= upper + 1,
                "pages={pages} produced {} chunks, expected roughly [{lower}, {upper}]",
                tasks.len()
            );
        }
    }

    #[test]
    fn twelve_pages_yields_six_chunks_of_two() {
        // matches scenario 2 in the testable-properties section
        let tasks = plan_chunks(12);
        assert_eq!(tasks.len(), 6);
        for t in &tasks {
            assert_eq!(t.range.len(), 2);
        }
    }
}
