// Copyright (c) Microsoft. All rights reserved.

/// Generate a self-signed device certificate whose common name is the registration id, as the
/// provisioning service expects for X.509 attestation.
pub fn device_identity(
    registration_id: &str,
) -> (
    openssl::x509::X509,
    openssl::pkey::PKey<openssl::pkey::Private>,
) {
    let group = openssl::ec::EcGroup::from_curve_name(openssl::nid::Nid::X9_62_PRIME256V1).unwrap();
    let private_key = openssl::ec::EcKey::generate(&group).unwrap();
    let private_key = openssl::pkey::PKey::from_ec_key(private_key).unwrap();

    let mut name = openssl::x509::X509Name::builder().unwrap();
    name.append_entry_by_text("CN", registration_id).unwrap();
    let name = name.build();

    let mut cert = openssl::x509::X509::builder().unwrap();
    cert.set_version(2).unwrap();
    cert.set_subject_name(&name).unwrap();
    cert.set_issuer_name(&name).unwrap();
    cert.set_pubkey(&private_key).unwrap();

    let not_before = openssl::asn1::Asn1Time::from_unix(0).unwrap();
    let not_after = openssl::asn1::Asn1Time::days_from_now(30).unwrap();
    cert.set_not_before(&not_before).unwrap();
    cert.set_not_after(&not_after).unwrap();

    cert.sign(&private_key, openssl::hash::MessageDigest::sha256())
        .unwrap();

    (cert.build(), private_key)
}

/// TLS context presenting a fresh [`device_identity`].
pub fn tls_context(registration_id: &str) -> provisioning_device_client::TlsContext {
    let (cert, private_key) = device_identity(registration_id);

    provisioning_device_client::TlsContext::new()
        .with_identity(vec![cert], private_key)
        .unwrap()
}
