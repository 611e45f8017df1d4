//! Request dispatch: external and internal paths, method enforcement, and
//! translation of handler outcomes into status codes and machine error codes.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::common::{form, new_post_id, now_ms};
use crate::node::data::{self, Account, Post, PostSummary};
use crate::node::replicate::{self, REPLICAS};
use crate::node::rpc::{Request, Response};
use crate::node::NodeState;

/// Closed vocabulary of machine-readable failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Method,
    Path,
    IdName,
    Id,
    Fields,
    Account,
    Exists,
    NotFound,
    Db,
    ReplicateAccount,
    ReplicatePost,
    AliveLt2,
}

impl Fault {
    pub fn status(self) -> u16 {
        match self {
            Fault::Method => 405,
            Fault::Path | Fault::Account | Fault::NotFound => 404,
            Fault::IdName | Fault::Id | Fault::Fields => 400,
            Fault::Exists => 409,
            Fault::Db => 500,
            Fault::ReplicateAccount | Fault::ReplicatePost | Fault::AliveLt2 => 503,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Fault::Method => "method",
            Fault::Path => "path",
            Fault::IdName => "id_name",
            Fault::Id => "id",
            Fault::Fields => "fields",
            Fault::Account => "account",
            Fault::Exists => "exists",
            Fault::NotFound => "not_found",
            Fault::Db => "db",
            Fault::ReplicateAccount => "replicate_account",
            Fault::ReplicatePost => "replicate_post",
            Fault::AliveLt2 => "alive_lt_2",
        }
    }
}

fn fail(fault: Fault) -> Response {
    Response {
        status: fault.status(),
        body: form::build(&[("ok", "0"), ("error", fault.code())]),
    }
}

fn ok(body: String) -> Response {
    Response { status: 200, body }
}

/// Route one request. Only `POST` is accepted; paths match exactly.
pub async fn dispatch(state: &Arc<NodeState>, request: Request) -> Response {
    if request.method != "POST" {
        return fail(Fault::Method);
    }

    let fields = form::parse(&request.body);
    match request.path.as_str() {
        "/account/create" => create_account(state, fields).await,
        "/account/get" => get_account(state, fields).await,
        "/post/create" => create_post(state, fields).await,
        "/post/get" => get_post(state, fields).await,
        "/post/titles" => list_titles(state, fields).await,

        "/internal/account/put" => put_account_internal(state, fields),
        "/internal/account/get" => get_account_internal(state, fields),
        "/internal/post/put" => put_post_internal(state, fields),
        "/internal/post/get" => get_post_internal(state, fields),
        "/internal/post/titles" => list_titles_internal(state, fields),
        "/internal/ping" => ok(form::build(&[("ok", "1")])),

        _ => fail(Fault::Path),
    }
}

fn field(fields: &HashMap<String, String>, name: &str) -> String {
    fields.get(name).cloned().unwrap_or_default()
}

fn account_body(account: &Account) -> String {
    let created_at = account.created_at.to_string();
    form::build(&[
        ("ok", "1"),
        ("id", account.id.as_str()),
        ("name", account.name.as_str()),
        ("password_hash", account.password_hash.as_str()),
        ("created_at", created_at.as_str()),
    ])
}

fn post_body(post: &Post) -> String {
    let created_at = post.created_at.to_string();
    form::build(&[
        ("ok", "1"),
        ("id", post.id.as_str()),
        ("account_id", post.account_id.as_str()),
        ("title", post.title.as_str()),
        ("content", post.content.as_str()),
        ("created_at", created_at.as_str()),
    ])
}

fn titles_body(items: &[PostSummary]) -> String {
    let mut pairs = vec![
        ("ok".to_string(), "1".to_string()),
        ("count".to_string(), items.len().to_string()),
    ];
    for (i, item) in items.iter().enumerate() {
        pairs.push((format!("id{i}"), item.id.clone()));
        pairs.push((format!("account_id{i}"), item.account_id.clone()));
        pairs.push((format!("title{i}"), item.title.clone()));
        pairs.push((format!("created_at{i}"), item.created_at.to_string()));
    }
    form::build(&pairs)
}

fn parse_limit(fields: &HashMap<String, String>) -> usize {
    fields
        .get("limit")
        .and_then(|v| v.parse::<i64>().ok())
        .map(|n| n.max(1) as usize)
        .unwrap_or(100)
}

async fn create_account(state: &Arc<NodeState>, fields: HashMap<String, String>) -> Response {
    let id = field(&fields, "id");
    let name = field(&fields, "name");
    let password_hash = field(&fields, "password_hash");
    if id.is_empty() || name.is_empty() {
        return fail(Fault::IdName);
    }

    let account = Account { id, name, password_hash, created_at: now_ms() };
    match state.with_store(|store| data::put_account(store, &account, true)) {
        Ok(true) => {}
        Ok(false) => return fail(Fault::Exists),
        Err(error) => {
            warn!(%error, account = %account.id, "account write failed");
            return fail(Fault::Db);
        }
    }

    if !state.cfg.single_node
        && !replicate::replicate_to_all(state, "/internal/account/put", account.to_form()).await
    {
        // The local row stays durable; the caller still sees the failure.
        warn!(account = %account.id, "account replication incomplete");
        return fail(Fault::ReplicateAccount);
    }

    ok(form::build(&[("ok", "1"), ("id", account.id.as_str()), ("name", account.name.as_str())]))
}

async fn get_account(state: &Arc<NodeState>, fields: HashMap<String, String>) -> Response {
    let id = field(&fields, "id");
    if id.is_empty() {
        return fail(Fault::Id);
    }

    match state.with_store(|store| data::read_account(store, &id)) {
        Ok(Some(account)) => return ok(account_body(&account)),
        Ok(None) => {}
        Err(error) => {
            warn!(%error, account = %id, "account read failed");
            return fail(Fault::Db);
        }
    }
    if state.cfg.single_node {
        return fail(Fault::NotFound);
    }

    let body = form::build(&[("id", id.as_str())]);
    match replicate::first_success(
        state,
        state.peers(),
        "/internal/account/get",
        body,
        state.cfg.read_remote_timeout(),
    )
    .await
    {
        Some(hit) => ok(hit),
        None => fail(Fault::NotFound),
    }
}

async fn create_post(state: &Arc<NodeState>, fields: HashMap<String, String>) -> Response {
    let mut id = field(&fields, "id");
    if id.is_empty() {
        id = new_post_id();
    }
    let post = Post {
        id,
        account_id: field(&fields, "account_id"),
        title: field(&fields, "title"),
        content: field(&fields, "content"),
        created_at: now_ms(),
    };
    if post.account_id.is_empty() || post.title.is_empty() || post.content.is_empty() {
        return fail(Fault::Fields);
    }

    match state.with_store(|store| data::account_exists(store, &post.account_id)) {
        Ok(true) => {}
        Ok(false) => return fail(Fault::Account),
        Err(error) => {
            warn!(%error, account = %post.account_id, "account lookup failed");
            return fail(Fault::Db);
        }
    }

    let owners = if state.cfg.single_node {
        vec![state.self_descriptor()]
    } else {
        let mut live = replicate::live_owners(state, &post.id).await;
        live.truncate(REPLICAS);
        if live.len() < REPLICAS {
            return fail(Fault::AliveLt2);
        }
        live
    };

    if !replicate::replicate_post(state, &post, &owners).await {
        return fail(Fault::ReplicatePost);
    }
    ok(post_body(&post))
}

async fn get_post(state: &Arc<NodeState>, fields: HashMap<String, String>) -> Response {
    let id = field(&fields, "id");
    if id.is_empty() {
        return fail(Fault::Id);
    }

    match state.with_store(|store| data::read_post(store, &id)) {
        Ok(Some(post)) => return ok(post_body(&post)),
        Ok(None) => {}
        Err(error) => {
            warn!(%error, post = %id, "post read failed");
            return fail(Fault::Db);
        }
    }
    if state.cfg.single_node {
        return fail(Fault::NotFound);
    }

    // The owner ranking is computed for its membership; the read races every
    // peer, so rank order does not influence the outcome.
    let targets: Vec<_> = replicate::ranked_owners(state, &id)
        .into_iter()
        .filter(|n| !state.is_self(n))
        .collect();
    let body = form::build(&[("id", id.as_str())]);
    match replicate::first_success(
        state,
        targets,
        "/internal/post/get",
        body,
        state.cfg.read_remote_timeout(),
    )
    .await
    {
        Some(hit) => ok(hit),
        None => fail(Fault::NotFound),
    }
}

async fn list_titles(state: &Arc<NodeState>, fields: HashMap<String, String>) -> Response {
    let limit = parse_limit(&fields);

    let local = match state.with_store(|store| data::local_titles(store, limit)) {
        Ok(local) => local,
        Err(error) => {
            warn!(%error, "title scan failed");
            return fail(Fault::Db);
        }
    };
    let mut merged: HashMap<String, PostSummary> =
        local.into_iter().map(|s| (s.id.clone(), s)).collect();

    if !state.cfg.single_node && state.cfg.list_titles_remote_enabled {
        merged = replicate::merge_remote_titles(state, limit, merged).await;
    }

    let mut items: Vec<PostSummary> = merged.into_values().collect();
    data::sort_summaries(&mut items);
    items.truncate(limit);
    ok(titles_body(&items))
}

fn put_account_internal(state: &Arc<NodeState>, fields: HashMap<String, String>) -> Response {
    let account = Account {
        id: field(&fields, "id"),
        name: field(&fields, "name"),
        password_hash: field(&fields, "password_hash"),
        created_at: fields.get("created_at").and_then(|v| v.parse().ok()).unwrap_or_else(now_ms),
    };
    match state.with_store(|store| data::put_account(store, &account, false)) {
        Ok(_) => ok(form::build(&[("ok", "1")])),
        Err(error) => {
            warn!(%error, account = %account.id, "replica account write failed");
            fail(Fault::Db)
        }
    }
}

fn get_account_internal(state: &Arc<NodeState>, fields: HashMap<String, String>) -> Response {
    let id = field(&fields, "id");
    if id.is_empty() {
        return fail(Fault::Id);
    }
    match state.with_store(|store| data::read_account(store, &id)) {
        Ok(Some(account)) => ok(account_body(&account)),
        Ok(None) => fail(Fault::NotFound),
        Err(error) => {
            warn!(%error, account = %id, "replica account read failed");
            fail(Fault::Db)
        }
    }
}

fn put_post_internal(state: &Arc<NodeState>, fields: HashMap<String, String>) -> Response {
    let post = Post {
        id: field(&fields, "id"),
        account_id: field(&fields, "account_id"),
        title: field(&fields, "title"),
        content: field(&fields, "content"),
        created_at: fields.get("created_at").and_then(|v| v.parse().ok()).unwrap_or_else(now_ms),
    };
    let if_absent = fields.get("if_absent").map(String::as_str) == Some("1");

    match state.with_store(|store| data::put_post(store, &post, if_absent)) {
        Ok(true) => ok(form::build(&[("ok", "1")])),
        Ok(false) => fail(Fault::Exists),
        Err(error) => {
            warn!(%error, post = %post.id, "replica post write failed");
            fail(Fault::Db)
        }
    }
}

fn get_post_internal(state: &Arc<NodeState>, fields: HashMap<String, String>) -> Response {
    let id = field(&fields, "id");
    match state.with_store(|store| data::read_post(store, &id)) {
        Ok(Some(post)) => ok(post_body(&post)),
        Ok(None) => fail(Fault::NotFound),
        Err(error) => {
            warn!(%error, post = %id, "replica post read failed");
            fail(Fault::Db)
        }
    }
}

fn list_titles_internal(state: &Arc<NodeState>, fields: HashMap<String, String>) -> Response {
    let limit = parse_limit(&fields);
    match state.with_store(|store| data::local_titles(store, limit)) {
        Ok(items) => ok(titles_body(&items)),
        Err(error) => {
            warn!(%error, "replica title scan failed");
            fail(Fault::Db)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Config;
    use crate::node::store::MemStore;

    fn single_node_state() -> Arc<NodeState> {
        let cfg = Config { node_id: "solo".to_string(), single_node: true, ..Config::default() };
        NodeState::new(cfg, Box::new(MemStore::new()))
    }

    fn post_req(path: &str, body: &str) -> Request {
        Request { method: "POST".to_string(), path: path.to_string(), body: body.as_bytes().to_vec() }
    }

    async fn send(state: &Arc<NodeState>, path: &str, body: &str) -> (u16, HashMap<String, String>) {
        let response = dispatch(state, post_req(path, body)).await;
        let fields = form::parse(response.body.as_bytes());
        (response.status, fields)
    }

    #[tokio::test]
    async fn non_post_method_is_rejected() {
        let state = single_node_state();
        let response = dispatch(
            &state,
            Request { method: "GET".to_string(), path: "/account/get".to_string(), body: vec![] },
        )
        .await;
        assert_eq!(response.status, 405);
        assert_eq!(response.body, "ok=0&error=method");
    }

    #[tokio::test]
    async fn unknown_path_is_rejected() {
        let state = single_node_state();
        let (status, fields) = send(&state, "/account/delete", "id=x").await;
        assert_eq!(status, 404);
        assert_eq!(fields["error"], "path");
    }

    #[tokio::test]
    async fn account_create_then_get() {
        let state = single_node_state();

        let (status, fields) = send(&state, "/account/create", "id=alice&name=Alice").await;
        assert_eq!(status, 200);
        assert_eq!(fields["ok"], "1");
        assert_eq!(fields["id"], "alice");
        assert_eq!(fields["name"], "Alice");

        let (status, fields) = send(&state, "/account/get", "id=alice").await;
        assert_eq!(status, 200);
        assert_eq!(fields["ok"], "1");
        assert_eq!(fields["name"], "Alice");
        assert!(fields["created_at"].chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn duplicate_account_conflicts() {
        let state = single_node_state();
        send(&state, "/account/create", "id=alice&name=Alice").await;

        let (status, fields) = send(&state, "/account/create", "id=alice&name=Other").await;
        assert_eq!(status, 409);
        assert_eq!(fields["error"], "exists");
    }

    #[tokio::test]
    async fn account_create_validates_fields() {
        let state = single_node_state();
        for body in ["", "id=x", "name=y"] {
            let (status, fields) = send(&state, "/account/create", body).await;
            assert_eq!(status, 400);
            assert_eq!(fields["error"], "id_name");
        }
    }

    #[tokio::test]
    async fn account_get_requires_id_and_misses_cleanly() {
        let state = single_node_state();

        let (status, fields) = send(&state, "/account/get", "").await;
        assert_eq!(status, 400);
        assert_eq!(fields["error"], "id");

        let (status, fields) = send(&state, "/account/get", "id=ghost").await;
        assert_eq!(status, 404);
        assert_eq!(fields["error"], "not_found");
    }

    #[tokio::test]
    async fn post_create_requires_existing_account() {
        let state = single_node_state();
        let (status, fields) =
            send(&state, "/post/create", "account_id=ghost&title=T&content=C").await;
        assert_eq!(status, 404);
        assert_eq!(fields["error"], "account");
    }

    #[tokio::test]
    async fn post_create_validates_fields() {
        let state = single_node_state();
        let (status, fields) = send(&state, "/post/create", "account_id=a&title=T").await;
        assert_eq!(status, 400);
        assert_eq!(fields["error"], "fields");
    }

    #[tokio::test]
    async fn post_create_generates_id_and_reads_back() {
        let state = single_node_state();
        send(&state, "/account/create", "id=alice&name=Alice").await;

        let (status, fields) =
            send(&state, "/post/create", "account_id=alice&title=Hello&content=World").await;
        assert_eq!(status, 200);
        assert_eq!(fields["ok"], "1");
        let id = fields["id"].clone();
        assert!(id.contains('-'));

        let (status, fields) = send(&state, "/post/get", &form::build(&[("id", id.as_str())])).await;
        assert_eq!(status, 200);
        assert_eq!(fields["title"], "Hello");
        assert_eq!(fields["content"], "World");
        assert_eq!(fields["account_id"], "alice");
    }

    #[tokio::test]
    async fn duplicate_post_id_fails_replication() {
        let state = single_node_state();
        send(&state, "/account/create", "id=alice&name=Alice").await;

        let (status, _) =
            send(&state, "/post/create", "id=p1&account_id=alice&title=T&content=C").await;
        assert_eq!(status, 200);

        let (status, fields) =
            send(&state, "/post/create", "id=p1&account_id=alice&title=T2&content=C2").await;
        assert_eq!(status, 503);
        assert_eq!(fields["error"], "replicate_post");

        // The first row survives untouched.
        let (_, fields) = send(&state, "/post/get", "id=p1").await;
        assert_eq!(fields["title"], "T");
    }

    #[tokio::test]
    async fn titles_list_newest_first_with_limit() {
        let state = single_node_state();
        send(&state, "/account/create", "id=alice&name=Alice").await;
        for i in 0..3 {
            let body = format!("id=p{i}&account_id=alice&title=Title+{i}&content=c");
            send(&state, "/post/create", &body).await;
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let (status, fields) = send(&state, "/post/titles", "limit=2").await;
        assert_eq!(status, 200);
        assert_eq!(fields["count"], "2");
        assert_eq!(fields["id0"], "p2");
        assert_eq!(fields["id1"], "p1");
        assert_eq!(fields["title0"], "Title 2");

        let ts0: i64 = fields["created_at0"].parse().unwrap();
        let ts1: i64 = fields["created_at1"].parse().unwrap();
        assert!(ts0 >= ts1);
    }

    #[tokio::test]
    async fn titles_limit_defaults_and_clamps() {
        let state = single_node_state();
        send(&state, "/account/create", "id=alice&name=Alice").await;
        send(&state, "/post/create", "id=p1&account_id=alice&title=T&content=C").await;

        // Non-numeric limit falls back to the default.
        let (_, fields) = send(&state, "/post/titles", "limit=abc").await;
        assert_eq!(fields["count"], "1");

        // Zero clamps up to one.
        let (_, fields) = send(&state, "/post/titles", "limit=0").await;
        assert_eq!(fields["count"], "1");
    }

    #[tokio::test]
    async fn ping_answers_ok() {
        let state = single_node_state();
        let (status, fields) = send(&state, "/internal/ping", "").await;
        assert_eq!(status, 200);
        assert_eq!(fields["ok"], "1");
    }

    #[tokio::test]
    async fn internal_put_account_is_unconditional() {
        let state = single_node_state();
        let (status, _) =
            send(&state, "/internal/account/put", "id=alice&name=A&created_at=123").await;
        assert_eq!(status, 200);

        let (status, _) = send(&state, "/internal/account/put", "id=alice&name=B&created_at=123").await;
        assert_eq!(status, 200);

        let (_, fields) = send(&state, "/internal/account/get", "id=alice").await;
        assert_eq!(fields["name"], "B");
        assert_eq!(fields["created_at"], "123");
    }

    #[tokio::test]
    async fn internal_put_post_honors_if_absent() {
        let state = single_node_state();

        let body = "id=p1&account_id=a&title=T&content=C&created_at=1000&if_absent=1";
        let (status, _) = send(&state, "/internal/post/put", body).await;
        assert_eq!(status, 200);

        let (status, fields) = send(&state, "/internal/post/put", body).await;
        assert_eq!(status, 409);
        assert_eq!(fields["error"], "exists");

        // Without if_absent the put replaces and reindexes.
        let replace = "id=p1&account_id=a&title=T2&content=C2&created_at=2000";
        let (status, _) = send(&state, "/internal/post/put", replace).await;
        assert_eq!(status, 200);
        let (_, fields) = send(&state, "/internal/post/get", "id=p1").await;
        assert_eq!(fields["title"], "T2");
        assert_eq!(fields["created_at"], "2000");
    }

    #[tokio::test]
    async fn internal_get_post_misses_cleanly() {
        let state = single_node_state();
        let (status, fields) = send(&state, "/internal/post/get", "id=ghost").await;
        assert_eq!(status, 404);
        assert_eq!(fields["error"], "not_found");
    }

    #[tokio::test]
    async fn internal_titles_match_local_order() {
        let state = single_node_state();
        for (id, ts) in [("a", "1000"), ("b", "3000"), ("c", "2000")] {
            let body = format!("id={id}&account_id=x&title=t{id}&content=c&created_at={ts}&if_absent=1");
            send(&state, "/internal/post/put", &body).await;
        }

        let (status, fields) = send(&state, "/internal/post/titles", "limit=10").await;
        assert_eq!(status, 200);
        assert_eq!(fields["count"], "3");
        assert_eq!(fields["id0"], "b");
        assert_eq!(fields["id1"], "c");
        assert_eq!(fields["id2"], "a");
    }

    #[tokio::test]
    async fn form_encoded_fields_survive_the_trip() {
        let state = single_node_state();
        send(&state, "/account/create", "id=alice&name=Alice+%26+Co").await;

        let (_, fields) = send(&state, "/account/get", "id=alice").await;
        assert_eq!(fields["name"], "Alice & Co");
    }
}
