//! Fuzzy search over job views.

use std::collections::{HashMap, HashSet};

use cronhook_core::SearchCriteria;

use crate::job::{DispatchView, JobKind, JobView};
use crate::similarity::{is_similar, levenshtein};

type Predicate<'a> = Box<dyn Fn(&JobView) -> bool + 'a>;

/// One supplied search field. Timestamp fields match but are not counted
/// toward the multi-field pruning.
struct Criterion<'a> {
    matches: Predicate<'a>,
    counted: bool,
}

/// The job whose name is closest to `name`; ties go to the earliest job.
pub(crate) fn find_most_similar<'a>(jobs: &'a [JobView], name: &str) -> Option<&'a JobView> {
    jobs.iter().min_by_key(|job| levenshtein(name, &job.name))
}

/// Jobs of one variant matching `criteria`.
///
/// Every supplied field yields its own list of hits; the lists are
/// concatenated. Names hit more than once win, deduplicated in first-hit
/// order. Without any repeat, several supplied fields yield nothing and a
/// single supplied field yields its hits unchanged. Empty strings and zero
/// repetitions count as not supplied.
pub(crate) fn find_similar<'a>(
    jobs: &'a [JobView],
    kind: JobKind,
    criteria: &SearchCriteria,
    threshold: usize,
) -> Vec<&'a JobView> {
    let criteria = criteria_for(kind, criteria, threshold);

    let mut hits = Vec::new();
    for criterion in &criteria {
        hits.extend(
            jobs.iter()
                .filter(|job| job.kind == kind && (criterion.matches)(*job)),
        );
    }

    let counted = criteria.iter().filter(|criterion| criterion.counted).count();
    prune(hits, counted)
}

fn prune(hits: Vec<&JobView>, supplied_fields: usize) -> Vec<&JobView> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for hit in &hits {
        *counts.entry(hit.name.as_str()).or_default() += 1;
    }

    if counts.values().any(|&count| count > 1) {
        let mut seen = HashSet::new();
        hits.into_iter()
            .filter(|hit| counts[hit.name.as_str()] > 1 && seen.insert(hit.name.as_str()))
            .collect()
    } else if supplied_fields > 1 {
        Vec::new()
    } else {
        hits
    }
}

fn criteria_for<'a>(kind: JobKind, criteria: &'a SearchCriteria, threshold: usize) -> Vec<Criterion<'a>> {
    let mut found: Vec<Criterion<'a>> = Vec::new();

    let mut text = |query: Option<&'a String>, counted: bool, field: fn(&JobView) -> Option<&str>| {
        if let Some(query) = query.filter(|query| !query.is_empty()) {
            found.push(Criterion {
                matches: Box::new(move |job: &JobView| {
                    field(job).is_some_and(|value| is_similar(query, value, threshold))
                }),
                counted,
            });
        }
    };

    text(criteria.name.as_ref(), true, |job| Some(job.name.as_str()));
    text(criteria.description.as_ref(), true, |job| Some(job.description.as_str()));
    text(criteria.cron.as_ref(), true, |job| job.cron.as_deref());
    text(criteria.next_run_at.as_ref(), true, |job| job.next_run_at.as_deref());
    text(criteria.created_at.as_ref(), false, |job| Some(job.created_at.as_str()));
    text(criteria.updated_at.as_ref(), false, |job| Some(job.updated_at.as_str()));

    match kind {
        JobKind::Http => {
            text(criteria.url.as_ref(), true, |job| match &job.dispatch {
                DispatchView::Http(http) => Some(http.url.as_str()),
                DispatchView::Queue(_) => None,
            });
        }
        JobKind::Queue => {
            text(criteria.queue_url.as_ref(), true, |job| match &job.dispatch {
                DispatchView::Queue(queue) => Some(queue.queue_url.as_str()),
                DispatchView::Http(_) => None,
            });
            text(criteria.message_group_id.as_ref(), true, |job| match &job.dispatch {
                DispatchView::Queue(queue) => queue.message_group_id.as_deref(),
                DispatchView::Http(_) => None,
            });
            text(criteria.message_deduplication_id.as_ref(), true, |job| match &job.dispatch {
                DispatchView::Queue(queue) => queue.message_deduplication_id.as_deref(),
                DispatchView::Http(_) => None,
            });
        }
    }

    if let Some(repetitions) = criteria.repetitions.filter(|&repetitions| repetitions > 0) {
        found.push(Criterion {
            matches: Box::new(move |job: &JobView| job.repetitions == Some(repetitions)),
            counted: true,
        });
    }

    match kind {
        JobKind::Http => {
            if let Some(method) = criteria.method {
                found.push(Criterion {
                    matches: Box::new(move |job: &JobView| {
                        matches!(&job.dispatch, DispatchView::Http(http) if http.method == method)
                    }),
                    counted: true,
                });
            }
        }
        JobKind::Queue => {
            if let Some(queue_kind) = criteria.queue_kind {
                found.push(Criterion {
                    matches: Box::new(move |job: &JobView| {
                        matches!(&job.dispatch, DispatchView::Queue(queue) if queue.queue_kind == queue_kind)
                    }),
                    counted: true,
                });
            }
        }
    }

    found
}

#[cfg(test)]
#[path = "search_test.rs"]
mod tests;
