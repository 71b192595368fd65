//! Record linkage: folds raw events from every source into canonical events.
//!
//! Within one date partition each raw event is first matched by exact
//! [`ComparisonKey`], then fuzzily against every candidate using three
//! criteria (title, artists, venue). Two passing criteria make a match.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use nightcat_core::normalize::{normalize, normalize_artist_list, normalize_venue};
use nightcat_core::{CanonicalEvent, ComparisonKey, RawEvent, Source};
use nightcat_storage::EventStore;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const TITLE_THRESHOLD: f64 = 85.0;
pub const VENUE_THRESHOLD: f64 = 90.0;
pub const ARTIST_THRESHOLD: f64 = 0.5;
pub const MIN_PASSING_CRITERIA: usize = 2;

/// Similarity on a 0-100 scale that ignores token order.
///
/// Both inputs are split on whitespace, the tokens sorted and re-joined, and
/// the results scored by indel similarity `2 * lcs / (len_a + len_b)` over
/// chars, rounded half-to-even to a whole number. Either side being empty
/// scores 0.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    fn sorted(s: &str) -> Vec<char> {
        let mut tokens = s.split_whitespace().collect::<Vec<_>>();
        tokens.sort_unstable();
        tokens.join(" ").chars().collect()
    }

    let (a, b) = (sorted(a), sorted(b));
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let common = longest_common_subsequence(&a, &b);
    (200.0 * common as f64 / (a.len() + b.len()) as f64).round_ties_even()
}

fn longest_common_subsequence(a: &[char], b: &[char]) -> usize {
    let mut row = vec![0usize; b.len() + 1];
    for &ca in a {
        let mut diag = 0;
        for (j, &cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == cb { diag + 1 } else { above.max(row[j]) };
            diag = above;
        }
    }
    row[b.len()]
}

/// Jaccard index of two lineups after qualifier stripping and b2b splitting.
pub fn artist_jaccard<A: AsRef<str>, B: AsRef<str>>(a: &[A], b: &[B]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let set_a = normalize_artist_list(a);
    let set_b = normalize_artist_list(b);
    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    set_a.intersection(&set_b).count() as f64 / union as f64
}

/// Per-criterion outcome of comparing one raw event with one candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchScore {
    pub title_score: f64,
    pub artist_jaccard: f64,
    /// `None` when either side has no venue; the criterion is then skipped.
    pub venue_score: Option<f64>,
}

impl MatchScore {
    pub fn title_passes(&self) -> bool {
        self.title_score > TITLE_THRESHOLD
    }

    pub fn artists_pass(&self) -> bool {
        self.artist_jaccard > ARTIST_THRESHOLD
    }

    pub fn venue_passes(&self) -> Option<bool> {
        self.venue_score.map(|score| score > VENUE_THRESHOLD)
    }

    pub fn evaluated(&self) -> usize {
        2 + usize::from(self.venue_score.is_some())
    }

    pub fn passed(&self) -> usize {
        usize::from(self.title_passes())
            + usize::from(self.artists_pass())
            + usize::from(self.venue_passes().unwrap_or(false))
    }

    pub fn is_match(&self) -> bool {
        self.passed() >= MIN_PASSING_CRITERIA
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// `None` when the dates differ; no other criterion can override that.
pub fn match_score(raw: &RawEvent, canonical: &CanonicalEvent) -> Option<MatchScore> {
    if raw.event_date != canonical.event_date {
        return None;
    }
    let title_score = token_sort_ratio(&normalize(&raw.title), &normalize(&canonical.title));
    let artist_jaccard = artist_jaccard(&raw.artists, &canonical.artists);
    let venue_score = match (
        present(raw.venue_name.as_deref()),
        present(canonical.venue_name.as_deref()),
    ) {
        (Some(a), Some(b)) => Some(token_sort_ratio(&normalize_venue(a), &normalize_venue(b))),
        _ => None,
    };
    Some(MatchScore {
        title_score,
        artist_jaccard,
        venue_score,
    })
}

pub fn is_fuzzy_match(raw: &RawEvent, canonical: &CanonicalEvent) -> bool {
    match_score(raw, canonical).is_some_and(|score| score.is_match())
}

fn fill<T: Clone>(slot: &mut Option<T>, incoming: &Option<T>) {
    if slot.is_none() && incoming.is_some() {
        slot.clone_from(incoming);
    }
}

/// Merges `raw` into `existing`, or seeds a new canonical event from it.
///
/// Fields only ever get richer: empty slots are filled, the lineup is
/// replaced only by a strictly longer one, attendance only grows, and a
/// description is replaced only by a longer one. Re-merging the same record
/// is a no-op.
pub fn merge_into_canonical(raw: &RawEvent, existing: Option<&CanonicalEvent>) -> CanonicalEvent {
    let Some(existing) = existing else {
        return CanonicalEvent {
            id: None,
            title: raw.title.clone(),
            event_date: raw.event_date,
            start_time: raw.start_time,
            end_time: raw.end_time,
            venue_name: raw.venue_name.clone(),
            venue_address: raw.venue_address.clone(),
            artists: raw.artists.clone(),
            cost_display: raw.cost_display.clone(),
            price_min_cents: raw.price_min_cents,
            price_max_cents: raw.price_max_cents,
            source_urls: raw
                .source_url
                .iter()
                .map(|url| (raw.source, url.clone()))
                .collect(),
            sources: vec![raw.source],
            attending_count: raw.attending_count,
            description: raw.description.clone(),
            image_url: raw.image_url.clone(),
            created_at: None,
            updated_at: None,
        };
    };

    let mut merged = existing.clone();
    fill(&mut merged.start_time, &raw.start_time);
    fill(&mut merged.end_time, &raw.end_time);
    fill(&mut merged.venue_name, &raw.venue_name);
    fill(&mut merged.venue_address, &raw.venue_address);
    if raw.artists.len() > merged.artists.len() {
        merged.artists.clone_from(&raw.artists);
    }
    fill(&mut merged.cost_display, &raw.cost_display);
    fill(&mut merged.price_min_cents, &raw.price_min_cents);
    fill(&mut merged.price_max_cents, &raw.price_max_cents);
    if let Some(url) = &raw.source_url {
        merged.source_urls.insert(raw.source, url.clone());
    }
    if !merged.sources.contains(&raw.source) {
        merged.sources.push(raw.source);
    }
    if let Some(incoming) = raw.attending_count {
        if merged.attending_count.map_or(true, |current| incoming > current) {
            merged.attending_count = Some(incoming);
        }
    }
    if let Some(incoming) = &raw.description {
        let longer = merged
            .description
            .as_ref()
            .map_or(true, |current| incoming.chars().count() > current.chars().count());
        if longer {
            merged.description = Some(incoming.clone());
        }
    }
    fill(&mut merged.image_url, &raw.image_url);
    merged
}

/// How a raw event picks among several fuzzy candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// First candidate, in partition order, that clears the threshold.
    #[default]
    FirstMatch,
    /// Most passing criteria, then highest title score, then earliest.
    BestScore,
}

/// Deduplicates by `(source, source_id)`. The last value wins but keeps the
/// position of the first occurrence.
pub fn dedupe_batch(events: Vec<RawEvent>) -> Vec<RawEvent> {
    let mut index: HashMap<(Source, String), usize> = HashMap::with_capacity(events.len());
    let mut out: Vec<RawEvent> = Vec::with_capacity(events.len());
    for event in events {
        match index.entry((event.source, event.source_id.clone())) {
            Entry::Occupied(slot) => out[*slot.get()] = event,
            Entry::Vacant(slot) => {
                slot.insert(out.len());
                out.push(event);
            }
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Fuzzy,
}

/// Canonical events visible to one date partition, plus the exact-key index.
#[derive(Debug, Default)]
pub struct PartitionCandidates {
    events: Vec<CanonicalEvent>,
    by_key: HashMap<ComparisonKey, usize>,
}

impl PartitionCandidates {
    pub fn new(existing: Vec<CanonicalEvent>) -> Self {
        let mut candidates = Self::default();
        for event in existing {
            candidates.push(event);
        }
        candidates
    }

    pub fn events(&self) -> &[CanonicalEvent] {
        &self.events
    }

    fn push(&mut self, event: CanonicalEvent) -> usize {
        let idx = self.events.len();
        self.by_key.insert(ComparisonKey::for_canonical(&event), idx);
        self.events.push(event);
        idx
    }

    fn replace(&mut self, idx: usize, event: CanonicalEvent) {
        self.by_key.insert(ComparisonKey::for_canonical(&event), idx);
        self.events[idx] = event;
    }

    pub fn find(&self, raw: &RawEvent, policy: MatchPolicy) -> Option<(usize, MatchKind)> {
        if let Some(&idx) = self.by_key.get(&ComparisonKey::for_raw(raw)) {
            return Some((idx, MatchKind::Exact));
        }

        let mut scored = self
            .events
            .iter()
            .enumerate()
            .filter_map(|(idx, candidate)| Some((idx, match_score(raw, candidate)?)))
            .filter(|(_, score)| score.is_match());

        let idx = match policy {
            MatchPolicy::FirstMatch => scored.next().map(|(idx, _)| idx),
            MatchPolicy::BestScore => scored
                .fold(None::<(usize, MatchScore)>, |best, (idx, score)| match best {
                    Some((_, top))
                        if (top.passed(), top.title_score) >= (score.passed(), score.title_score) =>
                    {
                        best
                    }
                    _ => Some((idx, score)),
                })
                .map(|(idx, _)| idx),
        };
        idx.map(|idx| (idx, MatchKind::Fuzzy))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkageSummary {
    pub raw_upserted: usize,
    pub partitions: usize,
    /// New canonical events created by this run.
    pub created: usize,
    pub merged_exact: usize,
    pub merged_fuzzy: usize,
    /// Matches whose merge changed nothing, so nothing was written.
    pub unchanged: usize,
}

pub struct LinkageEngine<'a> {
    store: &'a dyn EventStore,
    policy: MatchPolicy,
}

impl<'a> LinkageEngine<'a> {
    pub fn new(store: &'a dyn EventStore, policy: MatchPolicy) -> Self {
        Self { store, policy }
    }

    pub async fn run(&self, events: Vec<RawEvent>) -> Result<LinkageSummary> {
        let events = dedupe_batch(events);
        let mut summary = LinkageSummary {
            raw_upserted: self
                .store
                .upsert_raw_events(&events)
                .await
                .context("upserting raw events")?,
            ..LinkageSummary::default()
        };
        info!(count = summary.raw_upserted, "raw_events_stored");

        let mut by_date: BTreeMap<NaiveDate, Vec<RawEvent>> = BTreeMap::new();
        for event in events {
            by_date.entry(event.event_date).or_default().push(event);
        }
        summary.partitions = by_date.len();

        for (date, partition) in by_date {
            self.link_partition(date, partition, &mut summary).await?;
        }

        info!(new_events = summary.created, "dedup_complete");
        Ok(summary)
    }

    async fn link_partition(
        &self,
        date: NaiveDate,
        partition: Vec<RawEvent>,
        summary: &mut LinkageSummary,
    ) -> Result<()> {
        // No venue narrowing; "Nowadays" and "Nowadays NYC" must meet.
        let existing = self
            .store
            .canonical_by_date(date, None)
            .await
            .with_context(|| format!("loading canonical events for {date}"))?;
        let mut candidates = PartitionCandidates::new(existing);
        let (mut created, mut merged) = (0usize, 0usize);

        for raw in &partition {
            match candidates.find(raw, self.policy) {
                Some((idx, kind)) => {
                    let current = &candidates.events[idx];
                    let next = merge_into_canonical(raw, Some(current));
                    match kind {
                        MatchKind::Exact => summary.merged_exact += 1,
                        MatchKind::Fuzzy => summary.merged_fuzzy += 1,
                    }
                    merged += 1;
                    if &next == current {
                        summary.unchanged += 1;
                        continue;
                    }
                    self.store
                        .upsert_canonical_event(&next)
                        .await
                        .with_context(|| format!("updating canonical event {:?}", next.id))?;
                    candidates.replace(idx, next);
                }
                None => {
                    let mut fresh = merge_into_canonical(raw, None);
                    let id = self
                        .store
                        .upsert_canonical_event(&fresh)
                        .await
                        .with_context(|| {
                            format!("inserting canonical event for {}/{}", raw.source, raw.source_id)
                        })?;
                    fresh.id = Some(id);
                    candidates.push(fresh);
                    created += 1;
                }
            }
        }

        summary.created += created;
        info!(date = %date, created, merged, "partition_linked");
        Ok(())
    }
}

/// Stores the raw layer and links every record into the canonical catalog.
/// Returns the run summary; `created` is the number of new canonical events.
pub async fn deduplicate_and_store(
    store: &dyn EventStore,
    events: Vec<RawEvent>,
    policy: MatchPolicy,
) -> Result<LinkageSummary> {
    LinkageEngine::new(store, policy).run(events).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use nightcat_storage::MemoryEventStore;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn raw(source: Source, id: &str, title: &str, venue: Option<&str>, artists: &[&str]) -> RawEvent {
        let mut event = RawEvent::new(source, id, title, date(14));
        event.venue_name = venue.map(String::from);
        event.artists = artists.iter().map(|a| a.to_string()).collect();
        event.source_url = Some(format!("https://{source}.example/{id}"));
        event
    }

    #[test]
    fn token_sort_ratio_ignores_order() {
        assert_eq!(token_sort_ratio("night long all", "all night long"), 100.0);
        assert!(token_sort_ratio("house party", "techno marathon") < 50.0);
        assert_eq!(token_sort_ratio("", "anything"), 0.0);
    }

    #[test]
    fn token_sort_ratio_is_lenient_to_inserted_words() {
        assert_eq!(token_sort_ratio("bicep at elsewhere", "bicep elsewhere"), 91.0);
        assert_eq!(token_sort_ratio("house partys", "house party"), 96.0);
        assert_eq!(
            token_sort_ratio("honey dijon all night long", "honey dijon all night long extended"),
            85.0
        );
        assert_eq!(token_sort_ratio("house party", "techno marathon"), 31.0);
    }

    #[test]
    fn inserted_connective_still_passes_title() {
        let a = raw(Source::Ra, "1", "Bicep at Elsewhere", None, &["Bicep"]);
        let b = raw(Source::Dice, "2", "Bicep Elsewhere", None, &["Bicep"]);
        let canonical = merge_into_canonical(&a, None);
        let score = match_score(&b, &canonical).unwrap();
        assert_eq!(score.title_score, 91.0);
        assert_eq!(score.passed(), 2);
        assert!(is_fuzzy_match(&b, &canonical));
    }

    #[test]
    fn rounded_score_on_threshold_does_not_pass() {
        let a = raw(Source::Ra, "1", "Honey Dijon All Night Long", None, &["Honey Dijon"]);
        let b = raw(Source::Dice, "2", "Honey Dijon All Night Long Extended", None, &["Someone Else"]);
        let canonical = merge_into_canonical(&a, None);
        let score = match_score(&b, &canonical).unwrap();
        assert_eq!(score.title_score, TITLE_THRESHOLD);
        assert!(!score.title_passes());
        assert!(!is_fuzzy_match(&b, &canonical));
    }

    #[test]
    fn jaccard_strips_qualifiers() {
        let a = ["Bicep (DJ Set)", "Peggy Gou (Live)"];
        let b = ["Bicep", "Peggy Gou"];
        assert_eq!(artist_jaccard(&a, &b), 1.0);
        assert_eq!(artist_jaccard(&["A b2b B"], &["A", "C"]), 1.0 / 3.0);
        assert_eq!(artist_jaccard::<&str, &str>(&[], &[]), 0.0);
        assert_eq!(artist_jaccard(&["Solo"], &[] as &[&str]), 0.0);
    }

    #[test]
    fn fuzzy_match_requires_same_date() {
        let a = raw(Source::Ra, "1", "Honey Dijon All Night Long", Some("Nowadays"), &["Honey Dijon"]);
        let mut canonical = merge_into_canonical(&a, None);
        canonical.event_date = date(15);
        assert!(match_score(&a, &canonical).is_none());
        assert!(!is_fuzzy_match(&a, &canonical));
    }

    #[test]
    fn punctuation_variant_titles_match() {
        let a = raw(Source::Ra, "1", "Honey Dijon: All Night Long", Some("Nowadays"), &["Honey Dijon"]);
        let b = raw(Source::Dice, "2", "Honey Dijon All Night Long", Some("Nowadays"), &["Honey Dijon"]);
        let canonical = merge_into_canonical(&a, None);
        let score = match_score(&b, &canonical).unwrap();
        assert!(score.title_passes());
        assert!(score.artists_pass());
        assert!(is_fuzzy_match(&b, &canonical));
    }

    #[test]
    fn single_passing_criterion_is_not_enough() {
        let a = raw(Source::Ra, "1", "Warehouse Party", Some("Elsewhere"), &["Bicep"]);
        let b = raw(Source::Dice, "2", "Sunset Cruise", Some("Elsewhere"), &["Peggy Gou"]);
        let canonical = merge_into_canonical(&a, None);
        let score = match_score(&b, &canonical).unwrap();
        assert_eq!(score.evaluated(), 3);
        assert_eq!(score.passed(), 1);
        assert!(!score.is_match());
    }

    #[test]
    fn missing_venue_skips_that_criterion() {
        let a = raw(Source::Ra, "1", "Warehouse Party", None, &["Bicep"]);
        let b = raw(Source::Dice, "2", "Warehouse Party", Some("Elsewhere"), &["Bicep"]);
        let canonical = merge_into_canonical(&a, None);
        let score = match_score(&b, &canonical).unwrap();
        assert_eq!(score.evaluated(), 2);
        assert_eq!(score.venue_passes(), None);
        assert!(score.is_match());
    }

    #[test]
    fn new_canonical_has_one_source() {
        let a = raw(Source::Basement, "9", "Night", None, &[]);
        let canonical = merge_into_canonical(&a, None);
        assert_eq!(canonical.sources, vec![Source::Basement]);
        assert_eq!(canonical.source_urls.len(), 1);
        assert!(canonical.id.is_none());
    }

    #[test]
    fn merge_is_idempotent_and_only_enriches() {
        let mut first = raw(Source::Ra, "1", "Night", Some("Elsewhere"), &["A", "B"]);
        first.attending_count = Some(10);
        first.description = Some("short".into());
        first.price_min_cents = Some(2000);
        let base = merge_into_canonical(&first, None);

        let mut second = raw(Source::Dice, "2", "Night", None, &["A"]);
        second.attending_count = Some(4);
        second.description = Some("a much longer description".into());
        second.price_min_cents = Some(1500);
        second.venue_address = Some("599 Johnson Ave".into());

        let once = merge_into_canonical(&second, Some(&base));
        let twice = merge_into_canonical(&second, Some(&once));
        assert_eq!(once, twice);

        assert_eq!(once.artists, vec!["A", "B"]);
        assert_eq!(once.attending_count, Some(10));
        assert_eq!(once.price_min_cents, Some(2000));
        assert_eq!(once.description.as_deref(), Some("a much longer description"));
        assert_eq!(once.venue_name.as_deref(), Some("Elsewhere"));
        assert_eq!(once.venue_address.as_deref(), Some("599 Johnson Ave"));
        assert_eq!(once.sources, vec![Source::Ra, Source::Dice]);
        assert_eq!(once.source_urls.len(), 2);
    }

    #[test]
    fn longer_lineup_and_higher_attendance_win() {
        let base = merge_into_canonical(&raw(Source::Ra, "1", "Night", None, &["A"]), None);
        let mut richer = raw(Source::Partiful, "p", "Night", None, &["A", "B", "C"]);
        richer.attending_count = Some(99);
        let merged = merge_into_canonical(&richer, Some(&base));
        assert_eq!(merged.artists.len(), 3);
        assert_eq!(merged.attending_count, Some(99));
    }

    #[test]
    fn batch_dedup_keeps_first_position_and_last_value() {
        let a1 = raw(Source::Ra, "1", "First", None, &[]);
        let b = raw(Source::Ra, "2", "Other", None, &[]);
        let a2 = raw(Source::Ra, "1", "Second", None, &[]);
        let c = raw(Source::Dice, "1", "Same id other source", None, &[]);
        let out = dedupe_batch(vec![a1, b, a2, c]);
        let titles = out.iter().map(|e| e.title.as_str()).collect::<Vec<_>>();
        assert_eq!(titles, vec!["Second", "Other", "Same id other source"]);
    }

    #[test]
    fn policies_differ_when_several_candidates_clear_threshold() {
        let weak = merge_into_canonical(
            &raw(Source::Ra, "1", "House Party", Some("Nowadays"), &["DJ Harvey"]),
            None,
        );
        let strong = merge_into_canonical(
            &raw(Source::Ra, "2", "House Party", Some("Good Room Brooklyn"), &["DJ Harvey"]),
            None,
        );
        let candidates = PartitionCandidates::new(vec![weak, strong]);
        let incoming = raw(Source::Dice, "d", "House Partys", Some("Good Room"), &["DJ Harvey"]);

        assert_eq!(
            candidates.find(&incoming, MatchPolicy::FirstMatch),
            Some((0, MatchKind::Fuzzy))
        );
        assert_eq!(
            candidates.find(&incoming, MatchPolicy::BestScore),
            Some((1, MatchKind::Fuzzy))
        );
    }

    #[test]
    fn exact_key_wins_before_fuzzy_scoring() {
        let stored = merge_into_canonical(
            &raw(Source::Ra, "1", "Panorama Bar Night", Some("Elsewhere"), &[]),
            None,
        );
        let candidates = PartitionCandidates::new(vec![stored]);
        let incoming = raw(Source::Dice, "x", "panorama bar night!", Some("Elsewhere - Zone One"), &[]);
        assert_eq!(
            candidates.find(&incoming, MatchPolicy::FirstMatch),
            Some((0, MatchKind::Exact))
        );
    }

    #[tokio::test]
    async fn cross_source_records_collapse_into_one_event() {
        let store = MemoryEventStore::new();
        let ra = raw(
            Source::Ra,
            "1",
            "Panorama Bar Night",
            Some("Elsewhere"),
            &["Bicep (DJ Set)", "Peggy Gou (Live)"],
        );
        let dice = raw(
            Source::Dice,
            "x",
            "Panorama Bar Night",
            Some("Elsewhere - Zone One"),
            &["Bicep", "Peggy Gou"],
        );

        let summary = deduplicate_and_store(&store, vec![ra, dice], MatchPolicy::FirstMatch)
            .await
            .unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.merged_exact, 1);

        let events = store.canonical_events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sources, vec![Source::Ra, Source::Dice]);
        assert_eq!(events[0].source_urls.len(), 2);
        assert_eq!(store.raw_events().await.len(), 2);
    }

    #[tokio::test]
    async fn repeated_runs_do_not_duplicate() {
        let store = MemoryEventStore::new();
        let event = raw(Source::Basement, "481", "Basement Night", Some("Basement"), &["A"]);

        let first = deduplicate_and_store(&store, vec![event.clone()], MatchPolicy::FirstMatch)
            .await
            .unwrap();
        assert_eq!(first.created, 1);
        let writes_after_first = store.canonical_writes().await;

        let second = deduplicate_and_store(&store, vec![event.clone(), event], MatchPolicy::FirstMatch)
            .await
            .unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.raw_upserted, 1);
        assert_eq!(second.unchanged, 1);
        assert_eq!(store.canonical_events().await.len(), 1);
        assert_eq!(store.raw_events().await.len(), 1);
        assert_eq!(store.canonical_writes().await, writes_after_first);
    }

    #[tokio::test]
    async fn fuzzy_match_merges_across_runs() {
        let store = MemoryEventStore::new();
        let ra = raw(Source::Ra, "1", "Honey Dijon: All Night Long", Some("Nowadays"), &["Honey Dijon"]);
        deduplicate_and_store(&store, vec![ra], MatchPolicy::FirstMatch)
            .await
            .unwrap();

        let mut dice = raw(Source::Dice, "2", "Honey Dijon All Night Long (Extended)", Some("Nowadays NYC"), &["Honey Dijon"]);
        dice.attending_count = Some(300);
        let summary = deduplicate_and_store(&store, vec![dice], MatchPolicy::FirstMatch)
            .await
            .unwrap();
        assert_eq!(summary.created, 0);
        assert_eq!(summary.merged_fuzzy, 1);

        let events = store.canonical_events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].attending_count, Some(300));
        assert_eq!(events[0].title, "Honey Dijon: All Night Long");
    }

    #[tokio::test]
    async fn different_dates_never_merge() {
        let store = MemoryEventStore::new();
        let a = raw(Source::Ra, "1", "Same Night", Some("Elsewhere"), &["A"]);
        let mut b = raw(Source::Dice, "2", "Same Night", Some("Elsewhere"), &["A"]);
        b.event_date = date(15);
        let summary = deduplicate_and_store(&store, vec![a, b], MatchPolicy::FirstMatch)
            .await
            .unwrap();
        assert_eq!(summary.partitions, 2);
        assert_eq!(summary.created, 2);
    }
}
