//! Local surrealkv persistence smoke test.

use drydock_state::{BuildState, BuildStore, CommitRef, NewBuild, SurrealBuildStore};

#[tokio::test]
async fn surrealkv_backend_persists_builds() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("surrealkv://{}", dir.path().join("db").display());

    let store = SurrealBuildStore::connect(&url).await.unwrap();
    let build = store
        .create_build(NewBuild {
            project: "web".to_string(),
            commit_ref: CommitRef::try_from("c".repeat(40)).unwrap(),
            branch: "main".to_string(),
            queue: "ci".to_string(),
            primary_target: false,
            merge_on_success: false,
        })
        .await
        .unwrap();

    let reread = store.get_build(&build.build_id).await.unwrap();
    assert_eq!(reread.state, BuildState::WaitingForSync);
    assert_eq!(reread.project, "web");
}
