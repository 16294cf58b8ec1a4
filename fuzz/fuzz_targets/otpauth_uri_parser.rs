#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 4096 {
        return;
    }
    let Ok(uri) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(config) = pws_core::parse_otpauth_uri(uri) {
        let code = pws_core::generate_totp(&config, 59).expect("parsed config must derive");
        assert_eq!(code.len(), usize::from(config.digits));
    }
});
