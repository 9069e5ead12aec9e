use rowkit_admin::{DataClient, MEMBERS_WITH_ROLE_SQL, ORGANIZATION_STATS_SQL};
use rowkit_data::DataError;
use rowkit_postgrest::memory::Tables;
use rowkit_postgrest::{BackendFailure, MemoryTransport, PostgrestProvider};
use serde_json::{json, Value};

pub type Client = DataClient<PostgrestProvider<MemoryTransport>>;

/// Connected in-memory client whose SQL function understands the
/// statements the repositories issue.
pub async fn client() -> Client {
    let client = DataClient::in_memory();
    client
        .provider()
        .transport()
        .register_rpc("exec_sql", exec_sql);
    client.connect().await.unwrap();
    client.provider().transport().record_requests(true);
    client
}

fn rows<'a>(tables: &'a Tables, table: &str) -> impl Iterator<Item = &'a Value> {
    tables.get(table).into_iter().flatten()
}

fn exec_sql(tables: &Tables, args: &Value) -> Result<Vec<Value>, DataError> {
    let query = args["query"].as_str().unwrap_or_default();
    let org = &args["params"][0];

    if query == ORGANIZATION_STATS_SQL {
        let members = rows(tables, "memberships")
            .filter(|m| &m["organization_id"] == org && !m["accepted_at"].is_null())
            .count();
        let projects = rows(tables, "projects")
            .filter(|p| &p["organization_id"] == org && p["deleted_at"].is_null())
            .count();
        let storage: u64 = rows(tables, "storage_objects")
            .filter(|s| &s["organization_id"] == org)
            .filter_map(|s| s["size_bytes"].as_u64())
            .sum();
        return Ok(vec![json!({
            "members_count": members,
            "projects_count": projects,
            "api_keys_count": 0,
            "storage_bytes": storage,
            "usage_current_period": 0,
        })]);
    }

    if query == MEMBERS_WITH_ROLE_SQL {
        let rank = |role: &Value| match role.as_str() {
            Some("owner") => 0,
            Some("admin") => 1,
            _ => 2,
        };
        let mut members: Vec<Value> = rows(tables, "memberships")
            .filter(|m| &m["organization_id"] == org)
            .filter_map(|m| {
                let account = rows(tables, "accounts")
                    .find(|a| a["id"] == m["account_id"] && a["deleted_at"].is_null())?;
                Some(json!({
                    "account_id": account["id"],
                    "email": account["email"],
                    "full_name": account["full_name"],
                    "role": m["role"],
                    "joined_at": m["created_at"],
                }))
            })
            .collect();
        members.sort_by(|a, b| {
            rank(&a["role"])
                .cmp(&rank(&b["role"]))
                .then_with(|| a["joined_at"].as_str().cmp(&b["joined_at"].as_str()))
        });
        return Ok(members);
    }

    Err(BackendFailure::new(format!("unsupported statement: {query}")).into())
}
