#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 1024 * 1024 {
        return;
    }
    let Ok(body) = std::str::from_utf8(data) else {
        return;
    };

    let record = pws_core::SecretRecord::decode(body);
    let _ = record.password_of();
    if let Some(uri) = &record.otp_uri {
        let _ = pws_core::parse_otpauth_uri(uri);
    }

    // Re-decoding the encoded form must not change the record.
    let reencoded = pws_core::SecretRecord::decode(&record.encode());
    assert_eq!(reencoded.password, record.password);
    assert_eq!(reencoded.pairs, record.pairs);

    if let Ok(updated) = pws_core::set_password(body, "fuzz-password") {
        assert_eq!(updated.split('\n').next(), Some("fuzz-password"));
    }
});
