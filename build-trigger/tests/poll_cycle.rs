use build_trigger::{
    BuildResult, BuildScheduler, CompletedBuild, InMemoryScheduler, MergeAttempt,
    ParameterDefinition, Poller, TriggerConfig,
};
use httpmock::prelude::*;
use serde_json::json;
use stash_api::ClientConfig;
use std::time::Duration;

const PRS: &str = "/rest/api/1.0/projects/PROJ/repos/repo/pull-requests";
const START_MARKER: &str = "[*BuildStarted* **Job**] aaa111 into bbb222";

fn config(server: &MockServer) -> TriggerConfig {
    let mut client = ClientConfig::new(server.base_url(), "user", "secret", "PROJ", "repo");
    client.request_timeout = Duration::from_secs(5);
    TriggerConfig::new(client, "Job")
}

fn scheduler() -> InMemoryScheduler {
    InMemoryScheduler::new(vec![
        ParameterDefinition::new("sourceBranch", Some("default")),
        ParameterDefinition::new("suite", Some("smoke")),
    ])
}

fn pull_request(id: u64) -> serde_json::Value {
    json!({
        "id": id,
        "version": 4,
        "title": "Add feature",
        "state": "OPEN",
        "fromRef": {
            "id": "refs/heads/feature",
            "latestCommit": "aaa111",
            "repository": { "slug": "fork", "project": { "key": "~DEV" } }
        },
        "toRef": {
            "id": "refs/heads/master",
            "latestCommit": "bbb222",
            "repository": { "slug": "repo", "project": { "key": "PROJ" } }
        }
    })
}

fn mock_pull_requests(server: &MockServer, prs: Vec<serde_json::Value>) {
    server.mock(|when, then| {
        when.method(GET).path(PRS);
        then.status(200)
            .json_body(json!({ "values": prs, "isLastPage": true }));
    });
}

fn mock_mergeable(server: &MockServer, id: u64, can_merge: bool, conflicted: bool) {
    server.mock(|when, then| {
        when.method(GET).path(format!("{PRS}/{id}/merge"));
        then.status(200).json_body(json!({
            "canMerge": can_merge,
            "conflicted": conflicted,
            "vetoes": []
        }));
    });
}

fn mock_comments(server: &MockServer, id: u64, comments: Vec<serde_json::Value>) {
    let values: Vec<serde_json::Value> =
        comments.into_iter().map(|c| json!({ "comment": c })).collect();
    server.mock(|when, then| {
        when.method(GET).path(format!("{PRS}/{id}/activities"));
        then.status(200)
            .json_body(json!({ "values": values, "isLastPage": true }));
    });
}

#[tokio::test]
async fn fresh_pull_request_is_announced_and_queued() {
    let server = MockServer::start();
    mock_pull_requests(&server, vec![pull_request(7)]);
    mock_mergeable(&server, 7, true, false);
    mock_comments(&server, 7, vec![]);
    let post = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{PRS}/7/comments"))
            .header("authorization", "Basic dXNlcjpzZWNyZXQ=")
            .json_body(json!({ "text": START_MARKER }));
        then.status(201).json_body(json!({ "id": 40, "text": START_MARKER }));
    });

    let mut poller = Poller::new(&config(&server), scheduler()).expect("poller");
    let summary = poller.poll_once().await;

    post.assert_calls(1);
    assert_eq!(summary.pull_requests, 1);
    assert_eq!(summary.targets, 1);
    assert_eq!(summary.queued, 1);

    let queued = poller.scheduler().queued_items();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].cause.build_start_comment_id, Some(40));
    assert_eq!(queued[0].cause.build_command_comment_id, None);
    assert_eq!(queued[0].parameters[0].value, "feature");
    assert_eq!(queued[0].parameters[1].value, "smoke");

    let log = poller.last_poll_log();
    assert!(log[0].ends_with("poll started"));
    assert!(log.contains(&"Number of open pull requests: 1".to_string()));
    assert!(log.contains(&"Number of build targets to be built: 1".to_string()));
    assert!(log.contains(&"Queued job for PR #7".to_string()));
    assert!(log.last().is_some_and(|l| l.contains("poll completed in")));
}

#[tokio::test]
async fn already_built_commits_are_not_rebuilt() {
    let server = MockServer::start();
    mock_pull_requests(&server, vec![pull_request(7)]);
    mock_mergeable(&server, 7, true, false);
    mock_comments(&server, 7, vec![json!({ "id": 40, "text": START_MARKER })]);
    let post = server.mock(|when, then| {
        when.method(POST).path(format!("{PRS}/7/comments"));
        then.status(201).json_body(json!({ "id": 41, "text": "x" }));
    });

    let mut poller = Poller::new(&config(&server), scheduler()).expect("poller");
    let summary = poller.poll_once().await;

    post.assert_calls(0);
    assert_eq!(summary.targets, 0);
    assert!(poller.scheduler().queued_items().is_empty());
}

#[tokio::test]
async fn truncated_comment_history_skips_the_pull_request() {
    let server = MockServer::start();
    mock_pull_requests(&server, vec![pull_request(7)]);
    mock_mergeable(&server, 7, true, false);
    server.mock(|when, then| {
        when.method(GET)
            .path(format!("{PRS}/7/activities"))
            .query_param("start", "0");
        then.status(200).json_body(json!({
            "values": [{ "comment": { "id": 1, "text": "nice" } }],
            "isLastPage": false
        }));
    });
    let second_page = server.mock(|when, then| {
        when.method(GET)
            .path(format!("{PRS}/7/activities"))
            .query_param("start", "1");
        then.status(200).json_body(json!({
            "values": [{ "comment": { "id": 40, "text": START_MARKER } }],
            "isLastPage": true
        }));
    });
    let post = server.mock(|when, then| {
        when.method(POST).path(format!("{PRS}/7/comments"));
        then.status(201).json_body(json!({ "id": 41, "text": START_MARKER }));
    });

    let mut poller = Poller::new(&config(&server), scheduler()).expect("poller");
    let summary = poller.poll_once().await;

    second_page.assert_calls(0);
    post.assert_calls(0);
    assert_eq!(summary.targets, 0);
    assert_eq!(summary.queued, 0);
    assert!(poller.scheduler().queued_items().is_empty());
    assert!(
        poller
            .last_poll_log()
            .iter()
            .any(|l| l.starts_with("Cannot read comments for PR #7, not building"))
    );
}

#[tokio::test]
async fn only_on_comment_replies_to_each_command() {
    let server = MockServer::start();
    mock_pull_requests(&server, vec![pull_request(7)]);
    mock_mergeable(&server, 7, true, false);
    mock_comments(
        &server,
        7,
        vec![
            json!({ "id": 10, "text": "test this please\np:suite=full" }),
            json!({ "id": 11, "text": "nice" }),
            json!({ "id": 12, "text": "test this please" }),
        ],
    );
    let reply_10 = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{PRS}/7/comments"))
            .json_body(json!({ "text": START_MARKER, "parent": { "id": 10 } }));
        then.status(201).json_body(json!({ "id": 50, "text": START_MARKER }));
    });
    let reply_12 = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{PRS}/7/comments"))
            .json_body(json!({ "text": START_MARKER, "parent": { "id": 12 } }));
        then.status(201).json_body(json!({ "id": 51, "text": START_MARKER }));
    });

    let mut cfg = config(&server);
    cfg.only_build_on_comment = true;
    let mut poller = Poller::new(&cfg, scheduler()).expect("poller");
    let summary = poller.poll_once().await;

    reply_10.assert_calls(1);
    reply_12.assert_calls(1);
    assert_eq!(summary.queued, 2);

    let queued = poller.scheduler().queued_items();
    let full = queued
        .iter()
        .find(|q| q.cause.build_command_comment_id == Some(10))
        .expect("target for comment 10");
    assert_eq!(full.parameters[1].value, "full");
    assert_eq!(full.cause.build_start_comment_id, Some(50));
}

#[tokio::test]
async fn failed_start_marker_drops_the_build() {
    let server = MockServer::start();
    mock_pull_requests(&server, vec![pull_request(7)]);
    mock_mergeable(&server, 7, true, false);
    mock_comments(&server, 7, vec![]);
    server.mock(|when, then| {
        when.method(POST).path(format!("{PRS}/7/comments"));
        then.status(500).body("boom");
    });

    let mut poller = Poller::new(&config(&server), scheduler()).expect("poller");
    let summary = poller.poll_once().await;

    assert_eq!(summary.targets, 1);
    assert_eq!(summary.dropped, 1);
    assert_eq!(summary.queued, 0);
    assert!(poller.scheduler().queued_items().is_empty());
    assert!(
        poller
            .last_poll_log()
            .iter()
            .any(|l| l.starts_with("Cannot post \"BuildStarted\" comment for PR #7"))
    );
}

#[tokio::test]
async fn pull_request_list_failure_is_an_empty_cycle() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path(PRS);
        then.status(503);
    });

    let mut poller = Poller::new(&config(&server), scheduler()).expect("poller");
    let summary = poller.poll_once().await;

    assert_eq!(summary.pull_requests, 0);
    let log = poller.last_poll_log();
    assert!(log.iter().any(|l| l.starts_with("Cannot fetch pull request list")));
    assert!(log.contains(&"Number of open pull requests: 0".to_string()));
}

#[tokio::test]
async fn conflicted_pull_request_is_skipped_before_reading_comments() {
    let server = MockServer::start();
    mock_pull_requests(&server, vec![pull_request(7)]);
    mock_mergeable(&server, 7, true, true);
    let comments = server.mock(|when, then| {
        when.method(GET).path(format!("{PRS}/7/activities"));
        then.status(200).json_body(json!({ "values": [], "isLastPage": true }));
    });

    let mut cfg = config(&server);
    cfg.check_not_conflicted = true;
    let mut poller = Poller::new(&cfg, scheduler()).expect("poller");
    let summary = poller.poll_once().await;

    comments.assert_calls(0);
    assert_eq!(summary.targets, 0);
    assert!(
        poller
            .last_poll_log()
            .contains(&"Not building PR #7 as it cannot be merged".to_string())
    );
}

#[tokio::test]
async fn merge_status_failure_skips_the_pull_request() {
    let server = MockServer::start();
    mock_pull_requests(&server, vec![pull_request(7)]);
    server.mock(|when, then| {
        when.method(GET).path(format!("{PRS}/7/merge"));
        then.status(500);
    });

    let mut poller = Poller::new(&config(&server), scheduler()).expect("poller");
    let summary = poller.poll_once().await;

    assert_eq!(summary.targets, 0);
    assert!(
        poller
            .last_poll_log()
            .iter()
            .any(|l| l.starts_with("Cannot determine if PR #7 can be merged"))
    );
}

#[tokio::test]
async fn comment_fetch_failure_skips_the_pull_request() {
    let server = MockServer::start();
    mock_pull_requests(&server, vec![pull_request(7)]);
    mock_mergeable(&server, 7, true, false);
    server.mock(|when, then| {
        when.method(GET).path(format!("{PRS}/7/activities"));
        then.status(401);
    });

    let mut poller = Poller::new(&config(&server), scheduler()).expect("poller");
    let summary = poller.poll_once().await;

    assert_eq!(summary.targets, 0);
    assert!(
        poller
            .last_poll_log()
            .iter()
            .any(|l| l.starts_with("Cannot read comments for PR #7"))
    );
}

#[tokio::test]
async fn outdated_work_is_cancelled_before_queueing() {
    let server = MockServer::start();
    mock_pull_requests(&server, vec![pull_request(7)]);
    mock_mergeable(&server, 7, true, false);
    mock_comments(&server, 7, vec![]);
    server.mock(|when, then| {
        when.method(POST).path(format!("{PRS}/7/comments"));
        then.status(201).json_body(json!({ "id": 40, "text": START_MARKER }));
    });

    let mut cfg = config(&server);
    cfg.cancel_outdated_jobs = true;
    let mut poller = Poller::new(&cfg, scheduler()).expect("poller");

    poller.poll_once().await;
    poller.scheduler().start_next().expect("build 1 starts");
    poller.poll_once().await;
    poller.poll_once().await;

    let sched = poller.scheduler();
    assert_eq!(sched.interrupted().len(), 1);
    assert_eq!(sched.interrupted()[0].number, 1);
    assert_eq!(sched.cancelled().len(), 1);
    assert_eq!(sched.cancelled()[0].id, 2);
    assert_eq!(sched.queued_items().len(), 1);
    assert_eq!(sched.queued_items()[0].id, 3);
}

#[tokio::test]
async fn rejected_schedule_is_logged() {
    let server = MockServer::start();
    mock_pull_requests(&server, vec![pull_request(7)]);
    mock_mergeable(&server, 7, true, false);
    mock_comments(&server, 7, vec![]);
    server.mock(|when, then| {
        when.method(POST).path(format!("{PRS}/7/comments"));
        then.status(201).json_body(json!({ "id": 40, "text": START_MARKER }));
    });

    let sched = scheduler();
    sched.reject_all(true);
    let mut poller = Poller::new(&config(&server), sched).expect("poller");
    let summary = poller.poll_once().await;

    assert_eq!(summary.rejected, 1);
    assert!(
        poller
            .last_poll_log()
            .contains(&"Failed to queue job for PR #7".to_string())
    );
}

#[tokio::test]
async fn completed_build_posts_finish_marker_and_merges() {
    let server = MockServer::start();
    mock_pull_requests(&server, vec![pull_request(7)]);
    mock_mergeable(&server, 7, true, false);
    mock_comments(&server, 7, vec![json!({ "id": 10, "text": "test this please" })]);
    server.mock(|when, then| {
        when.method(POST)
            .path(format!("{PRS}/7/comments"))
            .json_body(json!({ "text": START_MARKER, "parent": { "id": 10 } }));
        then.status(201).json_body(json!({ "id": 40, "text": START_MARKER }));
    });
    let delete_start = server.mock(|when, then| {
        when.method(DELETE)
            .path(format!("{PRS}/7/comments/40"))
            .query_param("version", "0");
        then.status(204);
    });
    let finish = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{PRS}/7/comments"))
            .body_includes("[*BuildFinished* **Job**] aaa111 into bbb222")
            .body_includes("BUILD SUCCESS")
            .body_includes("Build *&#x0023;3* which took *2 min 5 sec*")
            .body_includes("feature passed");
        then.status(201).json_body(json!({ "id": 41, "text": "done" }));
    });
    let merge = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{PRS}/7/merge"))
            .query_param("version", "4");
        then.status(200).json_body(json!({ "id": 7, "version": 5, "state": "MERGED" }));
    });

    let mut cfg = config(&server);
    cfg.only_build_on_comment = true;
    cfg.merge_on_success = true;
    cfg.build_success_comment = Some("${sourceBranch} passed".to_string());
    let mut poller = Poller::new(&cfg, scheduler()).expect("poller");
    poller.poll_once().await;

    let build = poller.scheduler().start_next().expect("queued build");
    let completed = CompletedBuild {
        cause: build.cause,
        result: BuildResult::Success,
        build_url: "http://ci/job/Job/3/".to_string(),
        build_number: 3,
        duration: Duration::from_secs(125),
    };
    let attempt = poller.lifecycle().on_build_completed(&completed).await;

    delete_start.assert_calls(1);
    finish.assert_calls(1);
    merge.assert_calls(1);
    assert_eq!(attempt, MergeAttempt::Merged);
}

#[tokio::test]
async fn out_of_date_merge_is_reported_not_failed() {
    let server = MockServer::start();
    mock_pull_requests(&server, vec![pull_request(7)]);
    mock_mergeable(&server, 7, true, false);
    mock_comments(&server, 7, vec![]);
    server.mock(|when, then| {
        when.method(POST).path(format!("{PRS}/7/comments"));
        then.status(201).json_body(json!({ "id": 40, "text": START_MARKER }));
    });
    server.mock(|when, then| {
        when.method(DELETE).path(format!("{PRS}/7/comments/40"));
        then.status(404);
    });
    server.mock(|when, then| {
        when.method(POST).path(format!("{PRS}/7/merge"));
        then.status(409).body("pull request is out of date");
    });

    let mut cfg = config(&server);
    cfg.merge_on_success = true;
    let mut poller = Poller::new(&cfg, scheduler()).expect("poller");
    poller.poll_once().await;

    let build = poller.scheduler().start_next().expect("queued build");
    let mut completed = CompletedBuild {
        cause: build.cause,
        result: BuildResult::Success,
        build_url: "http://ci/job/Job/1/".to_string(),
        build_number: 1,
        duration: Duration::from_secs(3),
    };
    assert_eq!(
        poller.lifecycle().on_build_completed(&completed).await,
        MergeAttempt::Rejected("pull request is out of date".to_string())
    );

    completed.result = BuildResult::Unstable;
    assert_eq!(
        poller.lifecycle().maybe_merge(&completed).await,
        MergeAttempt::NotAttempted
    );
}

#[tokio::test]
async fn previous_finish_markers_are_deleted_before_start() {
    let server = MockServer::start();
    mock_pull_requests(&server, vec![pull_request(7)]);
    mock_mergeable(&server, 7, true, false);
    mock_comments(
        &server,
        7,
        vec![
            json!({ "id": 30, "text": "[*BuildFinished* **Job**] 000fff into bbb222 \n\n result" }),
            json!({ "id": 31, "text": "[*BuildFinished* **Other**] 000fff into bbb222" }),
        ],
    );
    let delete_own = server.mock(|when, then| {
        when.method(DELETE).path(format!("{PRS}/7/comments/30"));
        then.status(204);
    });
    let delete_other = server.mock(|when, then| {
        when.method(DELETE).path(format!("{PRS}/7/comments/31"));
        then.status(204);
    });
    let post = server.mock(|when, then| {
        when.method(POST).path(format!("{PRS}/7/comments"));
        then.status(201).json_body(json!({ "id": 40, "text": START_MARKER }));
    });

    let mut cfg = config(&server);
    cfg.delete_previous_finish_comments = true;
    let mut poller = Poller::new(&cfg, scheduler()).expect("poller");
    let summary = poller.poll_once().await;

    delete_own.assert_calls(1);
    delete_other.assert_calls(0);
    post.assert_calls(1);
    assert_eq!(summary.queued, 1);
}
