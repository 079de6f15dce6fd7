#![no_main]
use libfuzzer_sys::fuzz_target;
use xcap_appusage::XcapUri;

const ROOT: &str = "http://xcap.example.com/xcap-root";

fuzz_target!(|data: &[u8]| {
    let Ok(path) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(uri) = XcapUri::parse(ROOT, &format!("{}/{}", ROOT, path)) {
        let _ = uri.document_key();
        let _ = uri.parse_node_selector();
        let _ = uri.to_string();
    }
});
