//! Organizer
//!
//! Turns grouping results into a destination layout and submits the
//! whole plan as one transaction per batch. Primaries (and singletons)
//! land under `{target_root}/{category}/{decade}/`; every non-primary
//! goes to the rejected duplicates tree with an audit entry. Files with
//! unknown artist, title, genre, or year are routed to the needs-review
//! queue; nothing ever lands in an "Unknown" folder.

use crate::db::files::{FileRecord, FileStatus};
use crate::db::metadata::MetadataRow;
use crate::db::quality::QualityRow;
use crate::db::rejections::RejectionCategory;
use crate::db::{self, StoreError};
use crate::services::transaction_manager::{hash_path, StagedOp, TransactionManager, TxnError};
use shellac_common::config::{CleanupConfig, ConflictPolicy, DuplicateAction, GenreCategory};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// One unit of organization work: a duplicate group or a lone file
#[derive(Debug, Clone, Copy)]
pub enum OrganizeUnit {
    Group(i64),
    Singleton(i64),
}

/// Counts for one organized batch
#[derive(Debug, Clone, Default)]
pub struct OrganizeSummary {
    pub organized: u64,
    pub rejected: u64,
    pub needs_review: u64,
    pub skipped_identical: u64,
    pub bytes_copied: u64,
    /// (source, destination) pairs that were placed, for events
    pub placements: Vec<(String, String)>,
    /// (path, category) pairs that were rejected, for events
    pub rejections: Vec<(String, String)>,
}

/// A loaded file with the rows organization needs
struct Candidate {
    file: FileRecord,
    quality: QualityRow,
    metadata: Option<MetadataRow>,
}

/// What we decided to do with one file before staging
enum Placement {
    /// Copy/move/link to the organized tree
    Organize {
        file_id: i64,
        source: PathBuf,
        destination: PathBuf,
        hash: String,
        genre: String,
        decade: String,
        size_bytes: i64,
        conflict_note: Option<String>,
    },
    /// Content already present at the destination
    AlreadyPlaced {
        file_id: i64,
        destination: PathBuf,
        genre: String,
        decade: String,
    },
    /// Non-primary whose rejected copy already exists from a prior run
    AlreadyRejected { file_id: i64 },
    /// Non-primary of a group, headed for the rejected tree
    Reject {
        file_id: i64,
        source: PathBuf,
        destination: PathBuf,
        hash: String,
        chosen_file_id: i64,
        group_id: i64,
        reason: String,
        size_bytes: i64,
    },
    /// Missing or unmatchable metadata
    NeedsReview { file_id: i64, reason: String },
}

pub struct Organizer {
    pool: SqlitePool,
    target_root: PathBuf,
    rejected_root: PathBuf,
    pattern: String,
    max_filename_len: usize,
    conflict_policy: ConflictPolicy,
    action: DuplicateAction,
    write_quality_tags: bool,
    genre_categories: Vec<GenreCategory>,
    dry_run: bool,
}

impl Organizer {
    pub fn new(pool: SqlitePool, config: &CleanupConfig) -> Self {
        Self {
            pool,
            target_root: config.target_root.clone(),
            rejected_root: config.rejected_root.clone(),
            pattern: config.organize_pattern.clone(),
            max_filename_len: config.max_filename_len,
            conflict_policy: config.handle_conflicts,
            action: config.duplicate_action,
            write_quality_tags: config.write_quality_tags,
            genre_categories: config.genre_categories.clone(),
            dry_run: config.dry_run,
        }
    }

    /// Plan and submit one batch of units through the transaction manager.
    pub async fn organize_batch(
        &self,
        txn_manager: &TransactionManager,
        units: &[OrganizeUnit],
    ) -> Result<OrganizeSummary, TxnError> {
        let mut placements = Vec::new();
        let mut planned_paths: HashSet<PathBuf> = HashSet::new();

        for unit in units {
            match unit {
                OrganizeUnit::Singleton(file_id) => {
                    if let Some(candidate) = self.load_candidate(*file_id).await? {
                        let placement = self
                            .plan_primary(&candidate, &mut planned_paths)
                            .await?;
                        placements.push(placement);
                    }
                }
                OrganizeUnit::Group(group_id) => {
                    let mut group_plan = self
                        .plan_group(*group_id, &mut planned_paths)
                        .await?;
                    placements.append(&mut group_plan);
                }
            }
        }

        // Stage everything as one transaction
        let txn_id = txn_manager.begin("organize batch").await?;
        let mut dirs: HashSet<PathBuf> = HashSet::new();

        for placement in &placements {
            match placement {
                Placement::Organize {
                    file_id,
                    source,
                    destination,
                    hash,
                    ..
                }
                | Placement::Reject {
                    file_id,
                    source,
                    destination,
                    hash,
                    ..
                } => {
                    if let Some(parent) = destination.parent() {
                        if dirs.insert(parent.to_path_buf()) {
                            txn_manager
                                .stage(txn_id, StagedOp::create_dir(parent))
                                .await?;
                        }
                    }

                    match self.action {
                        DuplicateAction::Copy => {
                            txn_manager
                                .stage(txn_id, StagedOp::copy(*file_id, source, destination, hash))
                                .await?;
                        }
                        DuplicateAction::Move => {
                            txn_manager
                                .stage(txn_id, StagedOp::copy(*file_id, source, destination, hash))
                                .await?;
                            txn_manager
                                .stage(
                                    txn_id,
                                    StagedOp::remove_source(*file_id, source, destination, hash),
                                )
                                .await?;
                        }
                        DuplicateAction::Link => {
                            txn_manager
                                .stage(txn_id, StagedOp::link(*file_id, source, destination, hash))
                                .await?;
                        }
                    }

                    // Grade stamp goes on the organized copy only
                    if self.write_quality_tags
                        && matches!(placement, Placement::Organize { .. })
                        && self.action != DuplicateAction::Link
                    {
                        txn_manager
                            .stage(txn_id, StagedOp::write_tag(*file_id, destination))
                            .await?;
                    }
                }
                Placement::AlreadyPlaced { .. }
                | Placement::AlreadyRejected { .. }
                | Placement::NeedsReview { .. } => {}
            }
        }

        txn_manager.execute(txn_id).await?;

        // Close out the store state; in dry-run nothing moved, so rows
        // stay as they are and the pending plan remains inspectable
        let mut summary = OrganizeSummary::default();
        if self.dry_run {
            for placement in &placements {
                match placement {
                    Placement::Organize { .. } | Placement::AlreadyPlaced { .. } => {
                        summary.organized += 1
                    }
                    Placement::Reject { .. } | Placement::AlreadyRejected { .. } => {
                        summary.rejected += 1
                    }
                    Placement::NeedsReview { .. } => summary.needs_review += 1,
                }
            }
            return Ok(summary);
        }

        for placement in placements {
            self.apply_placement(placement, &mut summary).await?;
        }

        Ok(summary)
    }

    async fn apply_placement(
        &self,
        placement: Placement,
        summary: &mut OrganizeSummary,
    ) -> Result<(), TxnError> {
        match placement {
            Placement::Organize {
                file_id,
                source,
                destination,
                genre,
                decade,
                size_bytes,
                conflict_note,
                ..
            } => {
                db::targets::upsert(
                    &self.pool,
                    file_id,
                    &genre,
                    &decade,
                    &destination.to_string_lossy(),
                    &self.pattern,
                )
                .await?;
                db::files::set_status(&self.pool, file_id, FileStatus::Organized).await?;
                self.update_path_if_free(file_id, &destination.to_string_lossy())
                    .await?;

                if let Some(note) = conflict_note {
                    db::rejections::append(
                        &self.pool,
                        file_id,
                        RejectionCategory::Duplicate,
                        None,
                        None,
                        &destination.to_string_lossy(),
                        &source.to_string_lossy(),
                        None,
                        &note,
                    )
                    .await?;
                }

                summary.organized += 1;
                summary.bytes_copied += size_bytes.max(0) as u64;
                summary.placements.push((
                    source.to_string_lossy().to_string(),
                    destination.to_string_lossy().to_string(),
                ));
            }
            Placement::AlreadyPlaced {
                file_id,
                destination,
                genre,
                decade,
            } => {
                db::targets::upsert(
                    &self.pool,
                    file_id,
                    &genre,
                    &decade,
                    &destination.to_string_lossy(),
                    &self.pattern,
                )
                .await?;
                db::files::set_status(&self.pool, file_id, FileStatus::Organized).await?;
                self.update_path_if_free(file_id, &destination.to_string_lossy())
                    .await?;
                summary.organized += 1;
                summary.skipped_identical += 1;
            }
            Placement::Reject {
                file_id,
                source,
                destination,
                hash,
                chosen_file_id,
                group_id,
                reason,
                size_bytes,
            } => {
                db::rejections::append(
                    &self.pool,
                    file_id,
                    RejectionCategory::Duplicate,
                    Some(chosen_file_id),
                    Some(group_id),
                    &destination.to_string_lossy(),
                    &source.to_string_lossy(),
                    Some(&hash),
                    &reason,
                )
                .await?;
                db::files::set_status(&self.pool, file_id, FileStatus::Rejected).await?;
                if self.action == DuplicateAction::Move {
                    self.update_path_if_free(file_id, &destination.to_string_lossy())
                        .await?;
                }
                summary.rejected += 1;
                summary.bytes_copied += size_bytes.max(0) as u64;
                summary.rejections.push((
                    source.to_string_lossy().to_string(),
                    RejectionCategory::Duplicate.as_str().to_string(),
                ));
            }
            Placement::AlreadyRejected { file_id } => {
                db::files::set_status(&self.pool, file_id, FileStatus::Rejected).await?;
                summary.rejected += 1;
                summary.skipped_identical += 1;
            }
            Placement::NeedsReview { file_id, reason } => {
                db::targets::queue_for_review(&self.pool, file_id, &reason).await?;
                summary.needs_review += 1;
            }
        }
        Ok(())
    }

    /// Plan a whole group: primary placed, the rest rejected by rank
    async fn plan_group(
        &self,
        group_id: i64,
        planned_paths: &mut HashSet<PathBuf>,
    ) -> Result<Vec<Placement>, TxnError> {
        let members = db::groups::load_members(&self.pool, group_id).await?;
        let mut candidates = Vec::new();
        for member in &members {
            if let Some(candidate) = self.load_candidate(member.file_id).await? {
                candidates.push((member.clone(), candidate));
            }
        }

        // Rank by descending final score; the grouper's primary flag is
        // authoritative for who rank 1 is
        candidates.sort_by(|(ma, a), (mb, b)| {
            mb.is_primary
                .cmp(&ma.is_primary)
                .then(
                    b.quality
                        .final_score
                        .partial_cmp(&a.quality.final_score)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.file.id.cmp(&b.file.id))
        });

        let Some((primary_member, _)) = candidates.iter().find(|(m, _)| m.is_primary) else {
            tracing::warn!(group_id, "Group without primary, skipping");
            return Ok(Vec::new());
        };
        let primary_file_id = primary_member.file_id;

        let mut placements = Vec::new();
        for (rank, (member, candidate)) in candidates.iter().enumerate() {
            if member.file_id == primary_file_id {
                placements.push(self.plan_primary(candidate, planned_paths).await?);
            } else {
                placements.push(
                    self.plan_rejection(
                        candidate,
                        rank + 1,
                        primary_file_id,
                        group_id,
                        planned_paths,
                    )
                    .await?,
                );
            }
        }
        Ok(placements)
    }

    /// Plan one primary or singleton into the organized tree
    async fn plan_primary(
        &self,
        candidate: &Candidate,
        planned_paths: &mut HashSet<PathBuf>,
    ) -> Result<Placement, TxnError> {
        let file_id = candidate.file.id;

        let Some(metadata) = &candidate.metadata else {
            return Ok(Placement::NeedsReview {
                file_id,
                reason: "no metadata".to_string(),
            });
        };

        let (artist, title) = match (&metadata.artist, &metadata.title) {
            (Some(artist), Some(title))
                if !is_placeholder(artist) && !is_placeholder(title) =>
            {
                (artist.clone(), title.clone())
            }
            _ => {
                return Ok(Placement::NeedsReview {
                    file_id,
                    reason: "missing artist or title".to_string(),
                })
            }
        };

        let Some(year) = metadata.year else {
            return Ok(Placement::NeedsReview {
                file_id,
                reason: "missing year".to_string(),
            });
        };

        let Some(genre) = &metadata.genre else {
            return Ok(Placement::NeedsReview {
                file_id,
                reason: "missing genre".to_string(),
            });
        };
        let Some(category) = resolve_category(genre, &self.genre_categories) else {
            return Ok(Placement::NeedsReview {
                file_id,
                reason: format!("unmatched genre: {}", genre),
            });
        };

        let decade = decade_label(year);
        let source = PathBuf::from(&candidate.file.absolute_path);
        let ext = source
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let stem = expand_pattern(
            &self.pattern,
            &artist,
            &title,
            year,
            candidate.quality.final_score,
            self.max_filename_len,
        );
        let filename = if ext.is_empty() {
            stem
        } else {
            format!("{}.{}", stem, ext)
        };
        let desired = self.target_root.join(&category).join(&decade).join(filename);

        let hash = candidate
            .file
            .content_hash
            .clone()
            .ok_or_else(|| TxnError::Prepare(format!("File {} has no hash", file_id)))?;

        match self
            .resolve_conflict(&desired, &hash, planned_paths)
            .await?
        {
            Resolution::Place(destination) => Ok(Placement::Organize {
                file_id,
                source,
                destination,
                hash,
                genre: category,
                decade,
                size_bytes: candidate.file.size_bytes,
                conflict_note: None,
            }),
            Resolution::PlaceRenamed(destination) => {
                let note = format!(
                    "destination {} already held different content; placed as {}",
                    desired.display(),
                    destination.display()
                );
                Ok(Placement::Organize {
                    file_id,
                    source,
                    destination,
                    hash,
                    genre: category,
                    decade,
                    size_bytes: candidate.file.size_bytes,
                    conflict_note: Some(note),
                })
            }
            Resolution::SkipIdentical => Ok(Placement::AlreadyPlaced {
                file_id,
                destination: desired,
                genre: category,
                decade,
            }),
        }
    }

    /// Plan one non-primary into the rejected duplicates tree
    async fn plan_rejection(
        &self,
        candidate: &Candidate,
        rank: usize,
        chosen_file_id: i64,
        group_id: i64,
        planned_paths: &mut HashSet<PathBuf>,
    ) -> Result<Placement, TxnError> {
        let source = PathBuf::from(&candidate.file.absolute_path);
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "unnamed".to_string());
        let ext = source
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();

        let hash = candidate
            .file
            .content_hash
            .clone()
            .ok_or_else(|| TxnError::Prepare(format!("File {} has no hash", candidate.file.id)))?;

        let mut destination = self
            .rejected_root
            .join("duplicates")
            .join(format!("{}_duplicate_{}{}", stem, rank, ext));

        // Re-run case: the rejected copy from a previous run is already there
        if destination.exists() && !planned_paths.contains(&destination) {
            let existing = hash_path(destination.clone()).await?;
            if existing == hash {
                return Ok(Placement::AlreadyRejected {
                    file_id: candidate.file.id,
                });
            }
        }

        let mut n = 2;
        while planned_paths.contains(&destination) || destination.exists() {
            destination = self
                .rejected_root
                .join("duplicates")
                .join(format!("{}_duplicate_{}_dup{}{}", stem, rank, n, ext));
            n += 1;
        }
        planned_paths.insert(destination.clone());

        let chosen_score = db::quality::load_by_file(&self.pool, chosen_file_id)
            .await?
            .map(|q| q.final_score)
            .unwrap_or(0.0);
        let reason = format!(
            "score {:.1} vs {:.1} for chosen file",
            candidate.quality.final_score, chosen_score
        );

        Ok(Placement::Reject {
            file_id: candidate.file.id,
            source,
            destination,
            hash,
            chosen_file_id,
            group_id,
            reason,
            size_bytes: candidate.file.size_bytes,
        })
    }

    async fn resolve_conflict(
        &self,
        desired: &Path,
        content_hash: &str,
        planned_paths: &mut HashSet<PathBuf>,
    ) -> Result<Resolution, TxnError> {
        let occupied = planned_paths.contains(desired) || desired.exists();
        if !occupied {
            planned_paths.insert(desired.to_path_buf());
            return Ok(Resolution::Place(desired.to_path_buf()));
        }

        // On-disk conflicts can be the idempotent re-run case
        if !planned_paths.contains(desired) && desired.exists() {
            let existing = hash_path(desired.to_path_buf()).await?;
            if existing == content_hash {
                return Ok(Resolution::SkipIdentical);
            }
        }

        match self.conflict_policy {
            ConflictPolicy::Fail => Err(TxnError::Prepare(format!(
                "Destination occupied: {}",
                desired.display()
            ))),
            ConflictPolicy::SkipIfSameHash | ConflictPolicy::Rename => {
                // Smallest numbered name that is free on disk and in plan
                let mut n = 2;
                loop {
                    let renamed = dup_renamed(desired, n);
                    if !planned_paths.contains(&renamed) && !renamed.exists() {
                        planned_paths.insert(renamed.clone());
                        return Ok(Resolution::PlaceRenamed(renamed));
                    }
                    n += 1;
                }
            }
        }
    }

    /// Point the row at its destination unless another row (from a prior
    /// run) already holds that path
    async fn update_path_if_free(&self, file_id: i64, destination: &str) -> Result<(), StoreError> {
        if let Some(existing) = db::files::load_by_path(&self.pool, destination).await? {
            if existing.id != file_id {
                tracing::debug!(
                    file_id,
                    destination,
                    holder = existing.id,
                    "Destination path already tracked, keeping original path"
                );
                return Ok(());
            }
        }
        db::files::update_path(&self.pool, file_id, destination).await
    }

    async fn load_candidate(&self, file_id: i64) -> Result<Option<Candidate>, StoreError> {
        let Some(file) = db::files::load_by_id(&self.pool, file_id).await? else {
            return Ok(None);
        };
        let Some(quality) = db::quality::load_by_file(&self.pool, file_id).await? else {
            tracing::warn!(file_id, "File without quality row, skipping");
            return Ok(None);
        };
        let metadata = match file.metadata_id {
            Some(id) => db::metadata::load_by_id(&self.pool, id).await?,
            None => None,
        };
        Ok(Some(Candidate {
            file,
            quality,
            metadata,
        }))
    }
}

enum Resolution {
    Place(PathBuf),
    PlaceRenamed(PathBuf),
    SkipIdentical,
}

/// First category whose keyword list matches the lowercased genre wins
pub fn resolve_category(genre: &str, categories: &[GenreCategory]) -> Option<String> {
    let genre_lower = genre.trim().to_lowercase();
    if genre_lower.is_empty() {
        return None;
    }
    for category in categories {
        for keyword in &category.keywords {
            if genre_lower.contains(&keyword.to_lowercase()) {
                return Some(category.name.clone());
            }
        }
    }
    None
}

/// 1987 -> "1980s"
pub fn decade_label(year: i64) -> String {
    format!("{}s", (year / 10) * 10)
}

/// Expand the filename pattern and sanitize the result
fn expand_pattern(
    pattern: &str,
    artist: &str,
    title: &str,
    year: i64,
    final_score: f64,
    max_len: usize,
) -> String {
    let score_pct = final_score.round() as i64;
    let expanded = pattern
        .replace("{year}", &year.to_string())
        .replace("{artist}", &sanitize_component(artist))
        .replace("{title}", &sanitize_component(title))
        .replace("{score}", &score_pct.to_string());

    let mut result = sanitize_filename(&expanded);
    if result.len() > max_len {
        result.truncate(max_len);
        result = result.trim_end().to_string();
    }
    result
}

/// Replace path separators and invalid filename characters with '-'
fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn sanitize_filename(value: &str) -> String {
    sanitize_component(value).trim().to_string()
}

fn dup_renamed(desired: &Path, n: usize) -> PathBuf {
    let stem = desired
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let ext = desired
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    desired.with_file_name(format!("{}_dup{}{}", stem, n, ext))
}

/// True for tags that only pretend to identify the track
fn is_placeholder(value: &str) -> bool {
    let lower = value.trim().to_lowercase();
    lower.is_empty()
        || lower == "unknown"
        || lower == "unknown artist"
        || lower == "unknown title"
        || lower == "untitled"
        || lower == "various"
        || lower == "various artists"
        || lower == "track"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categories() -> Vec<GenreCategory> {
        CleanupConfig::default().genre_categories
    }

    #[test]
    fn test_category_first_match_wins() {
        assert_eq!(
            resolve_category("Deep House", &categories()),
            Some("House".to_string())
        );
        assert_eq!(
            resolve_category("TECHNO", &categories()),
            Some("Techno".to_string())
        );
        assert_eq!(resolve_category("polka", &categories()), None);
        assert_eq!(resolve_category("", &categories()), None);
    }

    #[test]
    fn test_decade_rounding() {
        assert_eq!(decade_label(1987), "1980s");
        assert_eq!(decade_label(1990), "1990s");
        assert_eq!(decade_label(2011), "2010s");
        assert_eq!(decade_label(2000), "2000s");
    }

    #[test]
    fn test_pattern_expansion() {
        let name = expand_pattern(
            "{year} - {artist} - {title} [QS{score}%]",
            "Carl Craig",
            "At Les",
            1997,
            89.5,
            180,
        );
        assert_eq!(name, "1997 - Carl Craig - At Les [QS90%]");
    }

    #[test]
    fn test_sanitization_replaces_invalid_characters() {
        let name = expand_pattern(
            "{year} - {artist} - {title}",
            "AC/DC",
            "Back: In?Black",
            1980,
            90.0,
            180,
        );
        assert_eq!(name, "1980 - AC-DC - Back- In-Black");
    }

    #[test]
    fn test_filename_length_cap() {
        let long_title = "x".repeat(400);
        let name = expand_pattern("{artist} - {title}", "A", &long_title, 2000, 80.0, 64);
        assert!(name.len() <= 64);
    }

    #[test]
    fn test_dup_rename_sequence() {
        let desired = Path::new("/t/House/2010s/a.mp3");
        assert_eq!(
            dup_renamed(desired, 2),
            PathBuf::from("/t/House/2010s/a_dup2.mp3")
        );
        assert_eq!(
            dup_renamed(desired, 3),
            PathBuf::from("/t/House/2010s/a_dup3.mp3")
        );
    }

    #[test]
    fn test_placeholder_detection() {
        assert!(is_placeholder("Unknown"));
        assert!(is_placeholder("unknown artist"));
        assert!(is_placeholder("  "));
        assert!(is_placeholder("Various Artists"));
        assert!(!is_placeholder("Aphex Twin"));
    }
}
