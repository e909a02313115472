#![no_main]
use std::sync::Arc;
use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use mixpki::descriptor::{LinkKey, PeerCredentials};
use mixpki::epoch::ManualClock;
use mixpki::{Authenticator, Document, DocumentStore};

fuzz_target!(|data: &[u8]| {
    if data.len() < 34 {
        return;
    }
    let (key, rest) = data.split_at(32);
    let mut link = [0u8; 32];
    link.copy_from_slice(key);
    let elapsed = Duration::from_secs(u64::from(rest[0]) * 60);

    let store = Arc::new(DocumentStore::new());
    store.put(Arc::new(Document::new(7, [], [], None)));
    let clock = Arc::new(ManualClock::at(7, elapsed));
    let auth = Authenticator::new(store, clock, false);

    let creds = PeerCredentials::new(rest[1..].to_vec(), LinkKey::from(link));
    let incoming = auth.authenticate_incoming(&creds);
    let outgoing = auth.authenticate_outgoing(&creds);
    assert!(!incoming.is_valid && !incoming.can_send);
    assert!(!outgoing.is_valid && outgoing.descriptor.is_none());
});
