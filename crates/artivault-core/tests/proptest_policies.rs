//! Property-based tests for artivault-core policies using proptest.

use artivault_core::{
    checksum::{compute_checksums, ChecksumPolicy, Checksums, Decision},
    types::{ChecksumSet, ChecksumType, RepoPath},
    PathPolicyMatcher,
};
use proptest::prelude::*;

fn any_policy() -> impl Strategy<Value = ChecksumPolicy> {
    prop_oneof![
        Just(ChecksumPolicy::GenerateIfAbsent),
        Just(ChecksumPolicy::Fail),
        Just(ChecksumPolicy::IgnoreAndGenerate),
        Just(ChecksumPolicy::PassThru),
        Just(ChecksumPolicy::Client),
        Just(ChecksumPolicy::Server),
    ]
}

fn any_checksum_type() -> impl Strategy<Value = ChecksumType> {
    prop_oneof![
        Just(ChecksumType::Md5),
        Just(ChecksumType::Sha1),
        Just(ChecksumType::Sha256)
    ]
}

/// Arbitrary, possibly empty, checksum maps with hex-ish values.
fn any_checksums() -> impl Strategy<Value = Checksums> {
    proptest::collection::btree_map(any_checksum_type(), "[0-9a-f]{4,8}", 0..3)
}

proptest! {
    /// Every policy returns a decision for every declared/computed combination.
    #[test]
    fn test_policy_total(policy in any_policy(), declared in any_checksums(), computed in any_checksums()) {
        let decision = policy.accept(&declared, &computed);
        let set = ChecksumSet::from_parts(&declared, &computed);
        for t in ChecksumType::ALL {
            let _ = policy.checksum_to_return(t, &set);
        }
        // A conflicting pair is never silently accepted.
        if !set.conflicting_types().is_empty() {
            prop_assert_ne!(decision, Decision::Accept);
        }
    }

    /// Content verified against its own checksums is always accepted.
    #[test]
    fn test_self_consistent_content_accepted(policy in any_policy(), data in proptest::collection::vec(any::<u8>(), 0..512)) {
        let computed = compute_checksums(&data);
        prop_assert_eq!(policy.accept(&computed, &computed), Decision::Accept);
    }

    /// Policies that trust the origin report the declared value whenever one exists.
    #[test]
    fn test_declared_value_reported(declared in "[0-9a-f]{40}", data in proptest::collection::vec(any::<u8>(), 0..64)) {
        let mut d = Checksums::new();
        d.insert(ChecksumType::Sha1, declared.clone());
        let set = ChecksumSet::from_parts(&d, &compute_checksums(&data));
        prop_assert_eq!(
            ChecksumPolicy::PassThru.checksum_to_return(ChecksumType::Sha1, &set),
            Some(declared)
        );
    }

    /// Path normalisation is idempotent and keeps identity.
    #[test]
    fn test_repo_path_normalisation(segments in proptest::collection::vec("[a-z0-9.]{1,6}", 0..6)) {
        let joined = segments.join("/");
        let p = RepoPath::new("libs", format!("/{}/", joined));
        let again = RepoPath::new("libs", p.path());
        prop_assert_eq!(&p, &again);
        prop_assert_eq!(p.path(), joined.as_str());
    }

    /// The permissive matcher admits every non-empty path.
    #[test]
    fn test_permissive_admits(segments in proptest::collection::vec("[a-zA-Z0-9_-]{1,8}", 1..6)) {
        let path = segments.join("/");
        prop_assert!(PathPolicyMatcher::permissive().admits(&path));
    }
}
