mod support;

use {
    smb2::{
        pdu::{signing_algorithm, Body},
        ClientConfig, Dialect, Dialer, Error, ErrorClass, Negotiator,
    },
    std::{sync::atomic::Ordering::SeqCst, time::Duration},
    support::*,
};

#[tokio::test]
async fn negotiates_highest_common_dialect() {
    let (server, session) = connect(Options {
        dialect: Dialect::Smb302,
        ..Default::default()
    })
    .await;

    let params = session.conn().negotiated().unwrap();
    assert_eq!(params.dialect, Dialect::Smb302);
    assert!(params.preauth.is_none());
    assert_eq!(params.signing_algorithm, signing_algorithm::AES_CMAC);
    assert!(session.is_signed());
    assert!(!session.is_guest());

    session.echo().await.unwrap();
    session.logoff().await.unwrap();
    assert_eq!(server.sessions(), 0);
}

#[tokio::test]
async fn every_dialect_signs() {
    for dialect in Dialect::ALL {
        let mut dialer = dialer(
            Negotiator {
                specified_dialect: Some(dialect),
                ..Default::default()
            },
            32,
        );
        let (server, session) = dial(Options::default(), &mut dialer).await;
        let session = session.unwrap();

        assert_eq!(session.conn().negotiated().unwrap().dialect, dialect);
        assert!(session.is_signed());
        session.echo().await.unwrap();
        let share = session.mount(SHARE).await.unwrap();
        share.write_file("f", b"signed", 0o644).await.unwrap();
        assert_eq!(share.read_file("f").await.unwrap(), b"signed");

        assert_eq!(server.stats.bad_signatures.load(SeqCst), 0, "{:?}", dialect);
        assert_eq!(server.stats.unsigned_requests.load(SeqCst), 0, "{:?}", dialect);
        assert!(server.stats.signed_requests.load(SeqCst) > 0);
        session.logoff().await.unwrap();
    }
}

#[tokio::test]
async fn wildcard_dialect_is_refused() {
    let mut dialer = dialer(Negotiator::default(), 32);
    let (_server, result) = dial(
        Options {
            wildcard: true,
            ..Default::default()
        },
        &mut dialer,
    )
    .await;
    assert_eq!(result.unwrap_err().class(), ErrorClass::Negotiation);
}

#[tokio::test]
async fn no_common_dialect() {
    let mut dialer = dialer(
        Negotiator {
            specified_dialect: Some(Dialect::Smb311),
            ..Default::default()
        },
        32,
    );
    let (_server, result) = dial(
        Options {
            dialect: Dialect::Smb210,
            ..Default::default()
        },
        &mut dialer,
    )
    .await;
    assert_eq!(result.unwrap_err().class(), ErrorClass::Negotiation);
}

#[tokio::test]
async fn preauth_integrity_over_several_rounds() {
    let (server, session) = connect(Options {
        auth_rounds: 3,
        require_signing: true,
        ..Default::default()
    })
    .await;

    let params = session.conn().negotiated().unwrap();
    assert_eq!(params.dialect, Dialect::Smb311);
    assert!(params.preauth.is_some());
    assert!(params.require_signing);
    assert!(session.is_signed());

    session.echo().await.unwrap();
    assert_eq!(server.stats.bad_signatures.load(SeqCst), 0);
    assert_eq!(server.stats.unsigned_requests.load(SeqCst), 0);
}

#[tokio::test]
async fn signing_context_selects_hmac() {
    let (server, session) = connect(Options {
        signing_algorithm: signing_algorithm::HMAC_SHA256,
        ..Default::default()
    })
    .await;

    let params = session.conn().negotiated().unwrap();
    assert_eq!(params.signing_algorithm, signing_algorithm::HMAC_SHA256);
    session.echo().await.unwrap();
    assert_eq!(server.stats.bad_signatures.load(SeqCst), 0);
}

#[tokio::test]
async fn wrong_password() {
    let mut dialer = Dialer::new(
        HOST,
        StaticInitiator {
            password: b"wrong".to_vec(),
            ..Default::default()
        },
    );
    let (_server, result) = dial(Options::default(), &mut dialer).await;
    let err = result.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Auth);
    assert!(err.is_permission());
}

#[tokio::test]
async fn guest_sessions() {
    let (_server, session) = connect(Options {
        guest: true,
        ..Default::default()
    })
    .await;
    assert!(session.is_guest());
    assert!(!session.is_signed());
    session.echo().await.unwrap();

    let mut dialer = dialer(Negotiator::default(), 32);
    let (_server, result) = dial(
        Options {
            guest: true,
            require_signing: true,
            ..Default::default()
        },
        &mut dialer,
    )
    .await;
    assert_eq!(result.unwrap_err().class(), ErrorClass::Auth);
}

#[tokio::test]
async fn signing_required_without_key() {
    let mut dialer = Dialer::new(
        HOST,
        StaticInitiator {
            key: None,
            ..Default::default()
        },
    );
    dialer.negotiator.require_message_signing = true;
    let (_server, result) = dial(Options::default(), &mut dialer).await;
    assert_eq!(result.unwrap_err().class(), ErrorClass::Auth);
}

#[tokio::test]
async fn tampered_response_fails_alone() {
    let (server, session) = connect(Options::default()).await;

    server.stats.tamper_next_echo.store(true, SeqCst);
    let err = session.echo().await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Integrity);

    // the connection survives a single bad signature
    session.echo().await.unwrap();
    assert_eq!(session.conn().credits().in_use(), 0);
}

#[tokio::test]
async fn unsigned_response_on_signed_session() {
    let (server, session) = connect(Options::default()).await;
    assert!(session.is_signed());

    server.stats.unsigned_next_echo.store(true, SeqCst);
    let err = session.echo().await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Integrity);
    assert!(matches!(err.root(), Error::Integrity { .. }), "{:?}", err);

    session.echo().await.unwrap();
    assert_eq!(session.conn().credits().in_use(), 0);
}

#[tokio::test]
async fn unsigned_guest_session_accepts_unsigned_responses() {
    let (server, session) = connect(Options {
        guest: true,
        ..Default::default()
    })
    .await;
    assert!(!session.is_signed());

    server.stats.unsigned_next_echo.store(true, SeqCst);
    session.echo().await.unwrap();
}

#[tokio::test]
async fn credits_never_exceed_max() {
    let mut dialer = dialer(Negotiator::default(), 8);
    let (server, session) = dial(
        Options {
            jitter: true,
            max_grant: 3,
            ..Default::default()
        },
        &mut dialer,
    )
    .await;
    let session = session.unwrap();

    let tasks: Vec<_> = (0..64)
        .map(|_| {
            let session = session.clone();
            tokio::spawn(async move { session.echo().await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let credits = session.conn().credits();
    assert_eq!(credits.max(), 8);
    assert!(credits.held() <= 8);
    assert_eq!(credits.in_use(), 0);
    assert!(server.stats.peak_outstanding.load(SeqCst) <= 8);
    assert!(server.stats.peak_outstanding.load(SeqCst) > 1);
    assert_eq!(server.stats.credit_violations.load(SeqCst), 0);
}

#[tokio::test]
async fn connection_loss_fails_pending_requests() {
    let (server, session) = connect(Options {
        stall_echo: true,
        ..Default::default()
    })
    .await;

    let tasks: Vec<_> = (0..5)
        .map(|_| {
            let session = session.clone();
            tokio::spawn(async move { session.echo().await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(50)).await;
    server.abort();

    for task in tasks {
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err.root(), Error::ConnectionLost), "{:?}", err);
    }
    assert!(session.conn().is_closed());
    let err = session.echo().await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Transport);
    assert!(matches!(err.root(), Error::ConnectionLost), "{:?}", err);
    assert_eq!(session.mount(SHARE).await.unwrap_err().class(), ErrorClass::Transport);
}

#[tokio::test]
async fn timeout_cancels_request() {
    let (_server, session) = connect(Options {
        stall_echo: true,
        ..Default::default()
    })
    .await;

    let pending = session
        .conn()
        .submit(session.id(), 0, Body::EchoRequest)
        .await
        .unwrap();
    let err = pending.wait_timeout(Duration::from_millis(20)).await.unwrap_err();
    assert!(matches!(err, Error::TimedOut));
}

#[tokio::test]
async fn logoff_invalidates_everything() {
    let (server, session) = connect(Options::default()).await;
    let share = session.mount(SHARE).await.unwrap();
    let mut file = share.create("open.txt").await.unwrap();

    session.logoff().await.unwrap();
    assert!(session.is_closed());
    assert!(share.is_closed());
    assert_eq!(server.trees(), 0);

    assert!(matches!(session.echo().await.unwrap_err().root(), Error::Closed(_)));
    assert_eq!(share.stat("open.txt").await.unwrap_err().class(), ErrorClass::LocalState);
    assert!(matches!(file.write(b"x").await.unwrap_err().root(), Error::Closed(_)));
    assert!(session.logoff().await.is_err());
    assert!(session.mount(SHARE).await.is_err());
}

#[tokio::test]
async fn logoff_keeps_connection_for_other_sessions() {
    let (server, first) = connect(Options::default()).await;
    let mut initiator = StaticInitiator::default();
    let second = smb2::session::authenticate(first.conn(), &mut initiator, HOST)
        .await
        .unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(server.sessions(), 2);
    assert_eq!(first.conn().sessions(), 2);

    let share = second.mount(SHARE).await.unwrap();
    first.logoff().await.unwrap();
    assert!(first.is_closed());
    assert!(!second.conn().is_closed());
    assert_eq!(server.sessions(), 1);

    second.echo().await.unwrap();
    share.write_file("after.txt", b"still here", 0o644).await.unwrap();
    assert_eq!(share.read_file("after.txt").await.unwrap(), b"still here");

    second.logoff().await.unwrap();
    assert!(second.conn().is_closed());
    assert_eq!(second.conn().sessions(), 0);
}

#[tokio::test]
async fn mount_paths() {
    let (server, session) = connect(Options::default()).await;

    let bare = session.mount(SHARE).await.unwrap();
    assert_eq!(bare.path(), format!(r"\\{}\{}", HOST, SHARE));
    let unc = session.mount(r"\\otherhost\PUBLIC").await.unwrap();
    assert_eq!(unc.path(), r"\\otherhost\PUBLIC");
    assert_ne!(bare.tree_id(), unc.tree_id());
    assert_eq!(server.trees(), 2);

    assert!(session.mount("missing").await.unwrap_err().is_not_found());
    assert!(session.mount(r"\\host\a\b").await.is_err());

    unc.umount().await.unwrap();
    assert_eq!(server.trees(), 1);
    assert!(matches!(unc.umount().await.unwrap_err().root(), Error::Closed(_)));
    bare.stat("").await.unwrap();
}

#[tokio::test]
async fn dial_from_config() {
    let cfg = ClientConfig::from_json(
        r#"{
            "max_credit_balance": 16,
            "transport": { "type": "tcp", "host": "fileserver" },
            "conn": { "signing": true, "dialect": 300 },
            "session": { "type": "ntlm", "user": "u", "passwd": "secret" },
            "tree_conn": { "share": "public" }
        }"#,
    )
    .unwrap();
    let mut dialer = Dialer::from_config(&cfg, StaticInitiator::default()).unwrap();
    assert_eq!(dialer.max_credit_balance, 16);

    let (_server, session) = dial(Options::default(), &mut dialer).await;
    let session = session.unwrap();
    let params = session.conn().negotiated().unwrap();
    assert_eq!(params.dialect, Dialect::Smb300);
    assert!(params.require_signing);
    assert_eq!(session.conn().credits().max(), 16);

    let share = session.mount(&cfg.tree_conn.share).await.unwrap();
    assert_eq!(share.path(), r"\\fileserver\public");
}
