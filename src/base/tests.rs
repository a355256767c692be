use crate::base::neterror::NetError;
use std::io;
use std::sync::Arc;

#[test]
fn test_net_error_roundtrip() {
    let original = NetError::ConnectionRefused;
    let code = original.as_i32();
    assert_eq!(code, -102);
    let converted = NetError::from(code);
    assert!(matches!(converted, NetError::ConnectionRefused));

    let name = NetError::NameNotResolved;
    assert_eq!(name.as_i32(), -105);
    assert!(matches!(NetError::from(-105), NetError::NameNotResolved));
}

#[test]
fn test_unknown_error() {
    let err = NetError::from(-9999);
    assert!(matches!(err, NetError::Unknown(-9999)));
    assert_eq!(err.as_i32(), -9999);
}

#[test]
fn test_context_variant_shares_base_code() {
    let err = NetError::NameNotResolvedFor {
        domain: "missing.invalid".to_string(),
        source: Arc::new(io::Error::new(io::ErrorKind::NotFound, "no such host")),
    };
    assert_eq!(err.as_i32(), NetError::NameNotResolved.as_i32());
    assert!(err.is_resolution_error());
    assert!(!NetError::ConnectionFailed.is_resolution_error());
}

#[test]
fn test_from_io_mapping() {
    let cases = [
        (io::ErrorKind::ConnectionRefused, -102),
        (io::ErrorKind::ConnectionReset, -101),
        (io::ErrorKind::TimedOut, -118),
        (io::ErrorKind::UnexpectedEof, -100),
        (io::ErrorKind::BrokenPipe, -100),
        (io::ErrorKind::Other, -104),
    ];
    for (kind, code) in cases {
        let err = NetError::from_io(&io::Error::new(kind, "test"));
        assert_eq!(err.as_i32(), code, "kind {:?}", kind);
    }
}
