use ahash::RandomState;
use std::path::Path;
use std::sync::LazyLock;
use tracing::info;

use crate::domain::{Entity, ParentRef};
use crate::error::MagpieError;
use crate::store::shard::ShardStore;

// Fixed seeds so the identity -> shard mapping survives restarts and is the
// same in every process that opens the same data directory.
static SHARD_HASHER: LazyLock<RandomState> =
    LazyLock::new(|| RandomState::with_seeds(0x6d61, 0x6770, 0x6965, 0x2e72));

/// Maps an external identity to its owning shard. Pure function of the id
/// and the shard count; storage load never influences the choice, so a
/// record's home shard can always be recomputed from its id alone.
pub fn stable_shard_id(external_id: &str, shard_count: usize) -> usize {
    debug_assert!(shard_count > 0);
    usize::try_from(SHARD_HASHER.hash_one(external_id) % shard_count as u64).unwrap_or(0)
}

/// Owns the shard set and routes every read and write.
///
/// Children (comments, reviews, checks) are routed by their PARENT's
/// external id, which co-locates them with the row carrying their summary
/// counter. Counter increments and recounts never cross a shard boundary.
pub struct ShardRouter {
    shards: Vec<ShardStore>,
}

impl ShardRouter {
    /// Opens `shard_count` stores under `data_dir` as `shard-000.sqlite`,
    /// `shard-001.sqlite`, ... The count must match across runs; the hash
    /// mapping is only stable for a fixed N.
    pub async fn open(data_dir: &Path, shard_count: usize) -> Result<Self, MagpieError> {
        let mut shards = Vec::with_capacity(shard_count);
        for shard_id in 0..shard_count {
            let url = format!(
                "sqlite://{}",
                data_dir.join(format!("shard-{shard_id:03}.sqlite")).display()
            );
            shards.push(ShardStore::open(shard_id, &url).await?);
        }
        info!(shard_count, data_dir = %data_dir.display(), "Shard router ready");
        Ok(Self { shards })
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shard(&self, shard_id: usize) -> Result<&ShardStore, MagpieError> {
        self.shards.get(shard_id).ok_or(MagpieError::ShardOutOfRange {
            shard: shard_id,
            count: self.shards.len(),
        })
    }

    pub fn shard_for(&self, external_id: &str) -> &ShardStore {
        &self.shards[stable_shard_id(external_id, self.shards.len())]
    }

    /// Routing identity for an entity: its own id for top-level records,
    /// the parent's id for children.
    pub fn routing_id(entity: &Entity) -> &str {
        match entity {
            Entity::Repository(r) => &r.external_id,
            Entity::Issue(i) => &i.external_id,
            Entity::PullRequest(p) => &p.external_id,
            Entity::Comment(c) => c.parent.external_id(),
            Entity::Review(r) => &r.pull_request_id,
            Entity::CiCheck(c) => &c.pull_request_id,
        }
    }

    pub fn shard_for_entity(&self, entity: &Entity) -> &ShardStore {
        self.shard_for(Self::routing_id(entity))
    }

    pub fn shard_for_parent(&self, parent: &ParentRef) -> &ShardStore {
        self.shard_for(parent.external_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_id_is_stable_across_calls() {
        let first = stable_shard_id("R_kgDOabc123", 8);
        for _ in 0..100 {
            assert_eq!(stable_shard_id("R_kgDOabc123", 8), first);
        }
    }

    #[test]
    fn shard_id_is_always_in_range() {
        for i in 0..1000 {
            let id = format!("I_{i}");
            assert!(stable_shard_id(&id, 7) < 7);
        }
        assert_eq!(stable_shard_id("anything", 1), 0);
    }

    #[test]
    fn shard_id_spreads_identities() {
        let mut seen = vec![false; 8];
        for i in 0..1000 {
            seen[stable_shard_id(&format!("PR_{i}"), 8)] = true;
        }
        assert!(seen.iter().all(|hit| *hit), "every shard should receive ids");
    }

    #[test]
    fn children_route_to_their_parents_shard() {
        use crate::domain::{Comment, Entity, ParentRef, PullRequest, Review};

        let pr = Entity::PullRequest(PullRequest {
            external_id: "PR_77".to_string(),
            repository_id: "R_1".to_string(),
            title: String::new(),
            state: "OPEN".to_string(),
        });
        let comment = Entity::Comment(Comment {
            external_id: "C_1".to_string(),
            parent: ParentRef::PullRequest("PR_77".to_string()),
            author: None,
        });
        let review = Entity::Review(Review {
            external_id: "REV_1".to_string(),
            pull_request_id: "PR_77".to_string(),
            author: None,
            state: None,
        });

        assert_eq!(ShardRouter::routing_id(&pr), "PR_77");
        assert_eq!(ShardRouter::routing_id(&comment), "PR_77");
        assert_eq!(ShardRouter::routing_id(&review), "PR_77");
    }
}
