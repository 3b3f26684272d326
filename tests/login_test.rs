mod common;

use common::{default_app, seed_user};
use curio_auth::services::{AuthStore, ServiceError};

#[tokio::test]
async fn login_succeeds_with_correct_password() {
    let app = default_app();
    let user = seed_user(&app.store, "alice", "alice@example.com", "correct horse").await;

    let (logged_in, session) = app
        .state
        .auth
        .login("alice", "correct horse", None)
        .await
        .expect("login");

    assert_eq!(logged_in.user_id, user.user_id);
    assert_eq!(session.user_id, Some(user.user_id));

    // The user row points at the freshly minted session.
    let stored = app.store.user(user.user_id).unwrap();
    assert_eq!(stored.session_token.as_deref(), Some(session.session_id.as_str()));
    assert_eq!(app.store.session_count_for(user.user_id), 1);
}

#[tokio::test]
async fn wrong_password_counts_a_failure() {
    let app = default_app();
    let user = seed_user(&app.store, "alice", "alice@example.com", "correct horse").await;

    let err = app
        .state
        .auth
        .login("alice", "battery staple", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidCredentials));

    let stored = app.store.user(user.user_id).unwrap();
    assert_eq!(stored.failed_login_count, 1);
    assert!(stored.locked_until.is_none());
}

#[tokio::test]
async fn unknown_username_gets_the_same_answer_as_wrong_password() {
    let app = default_app();
    seed_user(&app.store, "alice", "alice@example.com", "correct horse").await;

    let unknown = app
        .state
        .auth
        .login("nobody", "whatever", None)
        .await
        .unwrap_err();
    let wrong = app
        .state
        .auth
        .login("alice", "wrong", None)
        .await
        .unwrap_err();

    assert!(matches!(unknown, ServiceError::InvalidCredentials));
    assert!(matches!(wrong, ServiceError::InvalidCredentials));
}

#[tokio::test]
async fn federated_only_account_cannot_password_login() {
    let app = default_app();
    let user = curio_auth::models::User::new_federated(
        "bob".to_string(),
        Some("bob@example.com".to_string()),
        true,
    );
    app.store.insert_user(&user).await.unwrap();

    let err = app
        .state
        .auth
        .login("bob", "anything", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidCredentials));

    // Still counted against the account.
    assert_eq!(app.store.user(user.user_id).unwrap().failed_login_count, 1);
}
