#![no_main]
use libfuzzer_sys::fuzz_target;
use std::collections::BTreeMap;
use xcap_appusage::NodeSelector;

// Selectors come straight from request URIs; parsing must never panic
fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let mut bindings = BTreeMap::new();
    bindings.insert("rl".to_string(), "urn:ietf:params:xml:ns:resource-lists".to_string());

    if let Ok(selector) = NodeSelector::parse(text, bindings) {
        let _ = selector.attribute();
        let _ = selector.element.parent();
        let _ = selector.element.last_step();
    }
});
