//! Duplicate grouper
//!
//! Two passes over the healthy set: exact content-hash grouping first,
//! then acoustic grouping of whatever remains. The acoustic pass buckets
//! by coarse duration (rounded to one second) and compares fingerprints
//! pairwise within each bucket; pairs at or above the similarity
//! threshold are unioned into equivalence classes. Singletons create no
//! group rows. Primary selection uses the total tie-break order, so the
//! outcome is deterministic regardless of scheduling.

use crate::db::files::GroupingCandidate;
use crate::db::groups::GroupKeyKind;
use crate::db::{self, StoreResult};
use crate::extractors::Fingerprinter;
use crate::services::quality_scorer::primary_order;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;

/// Result of one grouping run
#[derive(Debug, Clone, Default)]
pub struct GroupingSummary {
    pub hash_groups: u64,
    pub fingerprint_groups: u64,
    pub grouped_files: u64,
    pub group_ids: Vec<i64>,
}

pub struct DuplicateGrouper {
    pool: SqlitePool,
    fingerprinter: Arc<dyn Fingerprinter>,
    similarity_threshold: f64,
    format_priority: Vec<String>,
}

impl DuplicateGrouper {
    pub fn new(
        pool: SqlitePool,
        fingerprinter: Arc<dyn Fingerprinter>,
        config: &shellac_common::config::CleanupConfig,
    ) -> Self {
        Self {
            pool,
            fingerprinter,
            similarity_threshold: config.duplicate_similarity_threshold,
            format_priority: config.format_priority.clone(),
        }
    }

    /// Group every healthy file, persist the groups, select primaries.
    pub async fn run(&self) -> StoreResult<GroupingSummary> {
        let candidates = db::files::load_grouping_candidates(&self.pool).await?;
        tracing::info!(candidates = candidates.len(), "Grouping healthy files");

        let mut summary = GroupingSummary::default();

        // Pass 1: exact content hash
        let mut by_hash: HashMap<&str, Vec<usize>> = HashMap::new();
        for (idx, candidate) in candidates.iter().enumerate() {
            by_hash.entry(candidate.content_hash.as_str()).or_default().push(idx);
        }

        let mut in_hash_group = vec![false; candidates.len()];
        let mut hash_keys: Vec<&str> = by_hash
            .iter()
            .filter(|(_, members)| members.len() >= 2)
            .map(|(hash, _)| *hash)
            .collect();
        hash_keys.sort_unstable();

        for hash in hash_keys {
            let indices = &by_hash[hash];
            for idx in indices {
                in_hash_group[*idx] = true;
            }
            let group_id = self
                .persist_group(&candidates, indices, GroupKeyKind::Hash, hash, |_| Some(1.0))
                .await?;
            summary.hash_groups += 1;
            summary.grouped_files += indices.len() as u64;
            summary.group_ids.push(group_id);
        }

        // Pass 2: acoustic similarity for the remainder
        if self.fingerprinter.enabled() {
            let acoustic: Vec<usize> = candidates
                .iter()
                .enumerate()
                .filter(|(idx, c)| !in_hash_group[*idx] && c.fingerprint.is_some())
                .map(|(idx, _)| idx)
                .collect();

            let classes = self.acoustic_classes(&candidates, &acoustic);
            for class in classes {
                if class.len() < 2 {
                    continue;
                }

                // Representative: lexicographically smallest fingerprint,
                // so the key is stable run over run
                let representative = class
                    .iter()
                    .filter_map(|idx| candidates[*idx].fingerprint.as_deref())
                    .min()
                    .unwrap_or_default()
                    .to_string();

                let fingerprinter = self.fingerprinter.clone();
                let rep = representative.clone();
                let group_id = self
                    .persist_group(&candidates, &class, GroupKeyKind::Fingerprint, &representative, move |c| {
                        c.fingerprint
                            .as_deref()
                            .map(|fp| fingerprinter.similarity(fp, &rep))
                    })
                    .await?;
                summary.fingerprint_groups += 1;
                summary.grouped_files += class.len() as u64;
                summary.group_ids.push(group_id);
            }
        }

        tracing::info!(
            hash_groups = summary.hash_groups,
            fingerprint_groups = summary.fingerprint_groups,
            grouped_files = summary.grouped_files,
            "Grouping complete"
        );

        Ok(summary)
    }

    /// Union acoustically-similar files within duration buckets
    fn acoustic_classes(
        &self,
        candidates: &[GroupingCandidate],
        acoustic: &[usize],
    ) -> Vec<Vec<usize>> {
        let mut buckets: HashMap<i64, Vec<usize>> = HashMap::new();
        for idx in acoustic {
            let duration = candidates[*idx].duration_sec.unwrap_or(0.0).round() as i64;
            buckets.entry(duration).or_default().push(*idx);
        }

        let mut uf = UnionFind::new(candidates.len());
        for bucket in buckets.values() {
            for i in 0..bucket.len() {
                for j in (i + 1)..bucket.len() {
                    let (a, b) = (bucket[i], bucket[j]);
                    let (Some(fa), Some(fb)) = (
                        candidates[a].fingerprint.as_deref(),
                        candidates[b].fingerprint.as_deref(),
                    ) else {
                        continue;
                    };
                    let similarity = self.fingerprinter.similarity(fa, fb);
                    if similarity >= self.similarity_threshold {
                        uf.union(a, b);
                    }
                }
            }
        }

        let mut classes: HashMap<usize, Vec<usize>> = HashMap::new();
        for idx in acoustic {
            classes.entry(uf.find(*idx)).or_default().push(*idx);
        }
        let mut result: Vec<Vec<usize>> = classes.into_values().collect();
        for class in &mut result {
            class.sort_unstable();
        }
        result.sort_by_key(|class| class[0]);
        result
    }

    async fn persist_group<F>(
        &self,
        candidates: &[GroupingCandidate],
        indices: &[usize],
        key_kind: GroupKeyKind,
        key_value: &str,
        similarity_of: F,
    ) -> StoreResult<i64>
    where
        F: Fn(&GroupingCandidate) -> Option<f64>,
    {
        let members: Vec<(i64, Option<f64>)> = indices
            .iter()
            .map(|idx| {
                let c = &candidates[*idx];
                (c.file_id, similarity_of(c))
            })
            .collect();

        let group_id = db::groups::create_group(&self.pool, key_kind, key_value, &members).await?;

        // Primary: best by score, then the total tie-break
        let mut ordered: Vec<&GroupingCandidate> =
            indices.iter().map(|idx| &candidates[*idx]).collect();
        ordered.sort_by(|a, b| primary_order(a, b, &self.format_priority));
        db::groups::set_primary(&self.pool, group_id, ordered[0].file_id).await?;

        tracing::debug!(
            group_id,
            key_kind = key_kind.as_str(),
            size = indices.len(),
            primary = %ordered[0].absolute_path,
            "Duplicate group persisted"
        );

        Ok(group_id)
    }
}

/// Disjoint-set with path compression
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Attach the larger root under the smaller for determinism
            if ra < rb {
                self.parent[rb] = ra;
            } else {
                self.parent[ra] = rb;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::files::FileStatus;
    use crate::db::init_store_in_memory;
    use crate::extractors::EnvelopeFingerprinter;
    use crate::models::{Grade, RecommendedAction};
    use chrono::Utc;
    use shellac_common::config::CleanupConfig;

    struct Seed<'a> {
        path: &'a str,
        hash: &'a str,
        fingerprint: Option<&'a str>,
        duration: f64,
        score: f64,
        codec: &'a str,
        bitrate: i64,
    }

    async fn seed(pool: &SqlitePool, seed: Seed<'_>) -> i64 {
        let file_id = db::files::upsert_discovered(pool, seed.path, 1000, Utc::now())
            .await
            .unwrap()
            .unwrap();

        let fingerprint_id = match seed.fingerprint {
            Some(fp) => Some(
                db::fingerprints::get_or_insert(
                    pool,
                    &db::fingerprints::FingerprintRow {
                        id: 0,
                        fingerprint: fp.to_string(),
                        duration_sec: Some(seed.duration),
                        sample_rate_hz: Some(44100),
                        bit_depth: None,
                        channels: Some(2),
                        codec: Some(seed.codec.to_string()),
                        bitrate_kbps: Some(seed.bitrate),
                    },
                )
                .await
                .unwrap(),
            ),
            None => None,
        };

        db::files::attach_analysis(pool, file_id, seed.hash, fingerprint_id, None, seed.score)
            .await
            .unwrap();
        db::quality::upsert(
            pool,
            &db::quality::QualityRow {
                id: 0,
                file_id,
                technical_score: seed.score,
                audio_fidelity_score: 100.0,
                integrity_score: 100.0,
                reference_score: None,
                final_score: seed.score,
                grade: Grade::from_score(seed.score),
                recommended_action: RecommendedAction::Keep,
                defects: vec![],
                health_score: 100,
                clipping_ratio: None,
                silence_ratio: None,
                duration_sec: Some(seed.duration),
            },
        )
        .await
        .unwrap();
        db::files::set_status(pool, file_id, FileStatus::Healthy)
            .await
            .unwrap();
        file_id
    }

    fn grouper(pool: &SqlitePool) -> DuplicateGrouper {
        let config = CleanupConfig::default();
        DuplicateGrouper::new(pool.clone(), Arc::new(EnvelopeFingerprinter::new()), &config)
    }

    fn env_fp(bytes: &[u8]) -> String {
        let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        format!("env1:{}", hex)
    }

    #[tokio::test]
    async fn test_identical_hashes_form_hash_group() {
        let pool = init_store_in_memory().await.unwrap();
        let a = seed(&pool, Seed { path: "/in/a.mp3", hash: "h1", fingerprint: None, duration: 200.0, score: 70.0, codec: "mp3", bitrate: 128 }).await;
        let b = seed(&pool, Seed { path: "/in/b.mp3", hash: "h1", fingerprint: None, duration: 200.0, score: 70.0, codec: "mp3", bitrate: 128 }).await;
        let _c = seed(&pool, Seed { path: "/in/c.mp3", hash: "h2", fingerprint: None, duration: 100.0, score: 60.0, codec: "mp3", bitrate: 128 }).await;

        let summary = grouper(&pool).run().await.unwrap();
        assert_eq!(summary.hash_groups, 1);
        assert_eq!(summary.fingerprint_groups, 0);
        assert_eq!(summary.grouped_files, 2);

        let group = db::groups::load_group(&pool, summary.group_ids[0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(group.key_kind, GroupKeyKind::Hash);
        // Identical scores, formats, bitrates, sizes: smallest path wins
        assert_eq!(group.primary_file_id, Some(a));

        let members = db::groups::load_members(&pool, group.id).await.unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.iter().any(|m| m.file_id == b && !m.is_primary));
    }

    #[tokio::test]
    async fn test_similar_fingerprints_form_acoustic_group() {
        let pool = init_store_in_memory().await.unwrap();
        // Same recording as FLAC and MP3: close envelopes, same duration
        let flac = seed(&pool, Seed {
            path: "/in/song.flac", hash: "hf",
            fingerprint: Some(&env_fp(&[100, 120, 90, 110])), duration: 200.0,
            score: 89.5, codec: "flac", bitrate: 900,
        }).await;
        let mp3 = seed(&pool, Seed {
            path: "/in/song.mp3", hash: "hm",
            fingerprint: Some(&env_fp(&[101, 119, 91, 109])), duration: 200.0,
            score: 77.0, codec: "mp3", bitrate: 320,
        }).await;
        // Different duration bucket entirely
        let _other = seed(&pool, Seed {
            path: "/in/other.mp3", hash: "ho",
            fingerprint: Some(&env_fp(&[100, 120, 90, 110, 50, 50])), duration: 350.0,
            score: 70.0, codec: "mp3", bitrate: 192,
        }).await;

        let summary = grouper(&pool).run().await.unwrap();
        assert_eq!(summary.fingerprint_groups, 1);

        let group_id = summary.group_ids[0];
        let group = db::groups::load_group(&pool, group_id).await.unwrap().unwrap();
        assert_eq!(group.key_kind, GroupKeyKind::Fingerprint);
        // The FLAC outscores the MP3
        assert_eq!(group.primary_file_id, Some(flac));

        let members = db::groups::load_members(&pool, group_id).await.unwrap();
        let mp3_member = members.iter().find(|m| m.file_id == mp3).unwrap();
        assert!(mp3_member.similarity.unwrap() >= 0.90);
    }

    #[tokio::test]
    async fn test_below_threshold_stays_ungrouped() {
        let pool = init_store_in_memory().await.unwrap();
        seed(&pool, Seed {
            path: "/in/x.mp3", hash: "hx",
            fingerprint: Some(&env_fp(&[200, 200, 200, 200])), duration: 180.0,
            score: 70.0, codec: "mp3", bitrate: 192,
        }).await;
        seed(&pool, Seed {
            path: "/in/y.mp3", hash: "hy",
            fingerprint: Some(&env_fp(&[40, 40, 40, 40])), duration: 180.0,
            score: 70.0, codec: "mp3", bitrate: 192,
        }).await;

        let summary = grouper(&pool).run().await.unwrap();
        assert_eq!(summary.hash_groups, 0);
        assert_eq!(summary.fingerprint_groups, 0);

        let singles = db::groups::ungrouped_healthy_file_ids(&pool).await.unwrap();
        assert_eq!(singles.len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_fingerprinter_uses_hash_only() {
        let pool = init_store_in_memory().await.unwrap();
        seed(&pool, Seed {
            path: "/in/x.mp3", hash: "hx",
            fingerprint: Some(&env_fp(&[10, 10, 10, 10])), duration: 180.0,
            score: 70.0, codec: "mp3", bitrate: 192,
        }).await;
        seed(&pool, Seed {
            path: "/in/y.mp3", hash: "hy",
            fingerprint: Some(&env_fp(&[10, 10, 10, 10])), duration: 180.0,
            score: 70.0, codec: "mp3", bitrate: 192,
        }).await;

        let mut config = CleanupConfig::default();
        config.enable_fingerprinting = false;
        let grouper = DuplicateGrouper::new(
            pool.clone(),
            Arc::new(crate::extractors::NoopFingerprinter),
            &config,
        );
        let summary = grouper.run().await.unwrap();
        assert_eq!(summary.fingerprint_groups, 0);
    }

    #[test]
    fn test_union_find_classes() {
        let mut uf = UnionFind::new(5);
        uf.union(0, 2);
        uf.union(2, 4);
        assert_eq!(uf.find(4), uf.find(0));
        assert_ne!(uf.find(1), uf.find(0));
    }
}
