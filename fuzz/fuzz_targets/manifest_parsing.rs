#![no_main]
use iox_engine::module::registry::ModuleManifest;
use iox_engine::module::validation::ManifestValidator;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Malformed manifests must produce an error, never a panic
    if let Ok(manifest) = ModuleManifest::parse(text) {
        let registration = manifest.to_registration();
        assert_eq!(registration.id, manifest.id);
        assert_eq!(registration.protocol, manifest.protocol);
        assert!(registration.schemes.is_empty());

        let _ = ManifestValidator::new().validate(&registration);
    }
});
