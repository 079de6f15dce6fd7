#![no_main]
use libfuzzer_sys::fuzz_target;
use xcap_appusage::appusage::validate_document;
use xcap_appusage::{Application, SchemaCatalog, UsageContext};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    // First byte picks the application so constraint checks get exercised too
    let application = Application::PRODUCTION[data[0] as usize % Application::PRODUCTION.len()];
    let context = UsageContext::new(true, SchemaCatalog::with_defaults(), &Application::PRODUCTION);
    let _ = validate_document(&data[1..], application, &context);
});
