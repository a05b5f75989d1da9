use proptest::prelude::*;
use hasp_crypto::kdf::{derive_keys, KdfKind, KdfParams};

fn params(iterations: u32) -> KdfParams {
    KdfParams {
        kind: KdfKind::Pbkdf2Sha256,
        iterations,
        memory_mib: None,
        parallelism: None,
    }
}

proptest! {
    #[test]
    fn derive_is_pure(password in "[ -~]{1,40}", email in "[a-z0-9.]{1,20}@[a-z0-9.]{1,20}", iterations in 1u32..8) {
        let params = params(iterations);
        let first = derive_keys(&password, &email, &params).expect("derive");
        let second = derive_keys(&password, &email, &params).expect("derive");
        prop_assert_eq!(first.master_key.as_bytes(), second.master_key.as_bytes());
        prop_assert_eq!(first.server_auth_hash, second.server_auth_hash);
        prop_assert_eq!(first.local_verification_hash, second.local_verification_hash);
    }

    #[test]
    fn purpose_hashes_differ(password in "[ -~]{1,40}", email in "[a-z0-9.]{1,20}@[a-z0-9.]{1,20}", iterations in 1u32..8) {
        let keys = derive_keys(&password, &email, &params(iterations)).expect("derive");
        prop_assert_ne!(keys.server_auth_hash, keys.local_verification_hash);
    }

    #[test]
    fn normalization_collapses_case_and_whitespace(password in "[ -~]{1,40}", local in "[a-z0-9]{1,10}", domain in "[a-z0-9]{1,10}", iterations in 1u32..8) {
        let email = format!("{local}@{domain}.com");
        let messy = format!("  {}@{}.COM ", local.to_uppercase(), domain);
        let params = params(iterations);
        let canonical = derive_keys(&password, &email, &params).expect("derive");
        let relaxed = derive_keys(&password, &messy, &params).expect("derive");
        prop_assert_eq!(canonical.server_auth_hash, relaxed.server_auth_hash);
    }
}
