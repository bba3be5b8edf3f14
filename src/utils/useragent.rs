//! Deterministic User-Agent rotation.
//!
//! The entry is picked from a pool of recent browser strings using the
//! machine's hostname, so a given host always presents the same identity.

/// Pool of recent browser user-agent strings.
const POOL: &[&str] = &[
    "Mozilla/5.0 (X11; Linux x86_64; rv:145.0) Gecko/20100101 Firefox/145.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:145.0) Gecko/20100101 Firefox/145.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:145.0) Gecko/20100101 Firefox/145.0",
    "Mozilla/5.0 (X11; Linux x86_64; rv:144.0) Gecko/20100101 Firefox/144.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:144.0) Gecko/20100101 Firefox/144.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:144.0) Gecko/20100101 Firefox/144.0",
    "Mozilla/5.0 (X11; Linux x86_64; rv:143.0) Gecko/20100101 Firefox/143.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:143.0) Gecko/20100101 Firefox/143.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:143.0) Gecko/20100101 Firefox/143.0",
];

fn hostname_to_number() -> u64 {
    let hostname = match sysinfo::System::host_name() {
        Some(name) => name,
        None => return 0,
    };
    let digest = md5::compute(hostname.as_bytes());
    u64::from_be_bytes(digest.0[..8].try_into().expect("md5 digest is 16 bytes"))
}

/// Pick the user agent for this machine.
pub fn get() -> &'static str {
    POOL[(hostname_to_number() % POOL.len() as u64) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_is_stable() {
        // Same host, same answer.
        assert_eq!(get(), get());
    }

    #[test]
    fn test_get_comes_from_pool() {
        assert!(POOL.contains(&get()));
    }
}
