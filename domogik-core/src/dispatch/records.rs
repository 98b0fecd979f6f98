//! Record views with rules of their own on top of plain CRUD: plugin
//! configuration keyed by `(name, hostname, key)`, user accounts and persons.

use chrono::NaiveDate;
use tracing::{debug, info};

use super::{DispatchError, DispatchResult, request::key_value_pairs};
use crate::repository::{Record, RecordFields, RecordId, Repository};

pub const CONFIG_ENTITY: &str = "plugin_config";
pub const ACCOUNT_ENTITY: &str = "user_account";
pub const PERSON_ENTITY: &str = "person";

const ACCOUNT_FIELDS: [&str; 4] = ["login", "is_admin", "skin_used", "person_id"];
const PERSON_FIELDS: [&str; 3] = ["first_name", "last_name", "birthday"];

/// `/plugin/config/...`
pub async fn plugin_config(
    repository: &dyn Repository,
    segments: &[&str],
) -> DispatchResult<Vec<Record>> {
    match segments {
        ["list"] => Ok(repository.list(CONFIG_ENTITY, &RecordFields::new()).await?),
        ["list", "by-name", name, hostname] => {
            let filter = fields([("name", *name), ("hostname", *hostname)]);
            Ok(repository.list(CONFIG_ENTITY, &filter).await?)
        }
        ["list", "by-name", name, hostname, "by-key", key] => {
            let filter = fields([("name", *name), ("hostname", *hostname), ("key", *key)]);
            Ok(repository.list(CONFIG_ENTITY, &filter).await?)
        }
        ["list", ..] => Err(DispatchError::BadRequest("Wrong syntax for list".to_string())),
        ["set", pairs @ ..] => {
            let params = params(pairs)?;
            let name = required(&params, "name")?;
            let hostname = required(&params, "hostname")?;
            let key = required(&params, "key")?;
            let value = required(&params, "value")?;
            info!(target: "domogik::dm", entity = CONFIG_ENTITY, plugin = name, hostname, key, "set");

            let filter = fields([("name", name), ("hostname", hostname), ("key", key)]);
            let existing = repository
                .list(CONFIG_ENTITY, &filter)
                .await?
                .into_iter()
                .next();
            let record = match existing {
                Some(existing) => {
                    repository
                        .update(CONFIG_ENTITY, existing.id, fields([("value", value)]))
                        .await?
                }
                None => {
                    let mut added = filter;
                    added.insert("value".to_string(), value.to_string());
                    repository.add(CONFIG_ENTITY, added).await?
                }
            };
            Ok(vec![record])
        }
        ["del", name, hostname] => {
            info!(target: "domogik::dm", entity = CONFIG_ENTITY, plugin = %name, %hostname, "del");
            let filter = fields([("name", *name), ("hostname", *hostname)]);
            let mut deleted = Vec::new();
            for record in repository.list(CONFIG_ENTITY, &filter).await? {
                deleted.push(repository.delete(CONFIG_ENTITY, record.id).await?);
            }
            Ok(deleted)
        }
        _ => Err(DispatchError::BadRequest(format!(
            "Unknown plugin config request: /{}",
            segments.join("/")
        ))),
    }
}

/// `/account/user/...` and `/account/person/...`
pub async fn account(repository: &dyn Repository, segments: &[&str]) -> DispatchResult<Vec<Record>> {
    match segments {
        ["user", rest @ ..] => user(repository, rest).await,
        ["person", rest @ ..] => person(repository, rest).await,
        _ => Err(DispatchError::BadRequest(format!(
            "Unknown account request: /{}",
            segments.join("/")
        ))),
    }
}

async fn user(repository: &dyn Repository, segments: &[&str]) -> DispatchResult<Vec<Record>> {
    match segments {
        ["list"] => Ok(repository.list(ACCOUNT_ENTITY, &RecordFields::new()).await?),
        ["list", "by-id", id] => Ok(vec![repository.get(ACCOUNT_ENTITY, parse_id(id)?).await?]),
        ["list", ..] => Err(DispatchError::BadRequest("Wrong syntax for list".to_string())),
        ["add", pairs @ ..] => {
            let params = params(pairs)?;
            let login = required(&params, "login")?;
            ensure_login_free(repository, login, None).await?;

            let mut account = pick(&params, &ACCOUNT_FIELDS);
            account.insert("is_admin".to_string(), parse_flag(params.get("is_admin"))?);
            match params.get("person_id") {
                Some(person_id) => {
                    repository.get(PERSON_ENTITY, parse_id(person_id)?).await?;
                }
                None => {
                    let person = repository
                        .add(PERSON_ENTITY, person_fields(&params, true)?)
                        .await?;
                    account.insert("person_id".to_string(), person.id.to_string());
                }
            }
            info!(target: "domogik::dm", entity = ACCOUNT_ENTITY, login, "add");
            Ok(vec![repository.add(ACCOUNT_ENTITY, account).await?])
        }
        ["update", pairs @ ..] => {
            let params = params(pairs)?;
            let id = parse_id(required(&params, "id")?)?;
            let current = repository.get(ACCOUNT_ENTITY, id).await?;
            if let Some(login) = params.get("login") {
                ensure_login_free(repository, login, Some(id)).await?;
            }

            let mut changes = pick(&params, &ACCOUNT_FIELDS);
            if params.contains_key("is_admin") {
                changes.insert("is_admin".to_string(), parse_flag(params.get("is_admin"))?);
            }
            match params.get("person_id") {
                Some(person_id) => {
                    repository.get(PERSON_ENTITY, parse_id(person_id)?).await?;
                }
                None => {
                    // without a new person_id, person fields edit the linked person
                    let person = person_fields(&params, false)?;
                    if !person.is_empty() {
                        if let Some(linked) = current.fields.get("person_id") {
                            repository
                                .update(PERSON_ENTITY, parse_id(linked)?, person)
                                .await?;
                        }
                    }
                }
            }
            info!(target: "domogik::dm", entity = ACCOUNT_ENTITY, id, "update");
            Ok(vec![repository.update(ACCOUNT_ENTITY, id, changes).await?])
        }
        ["del", id] => {
            let id = parse_id(id)?;
            info!(target: "domogik::dm", entity = ACCOUNT_ENTITY, id, "del");
            Ok(vec![repository.delete(ACCOUNT_ENTITY, id).await?])
        }
        _ => Err(DispatchError::BadRequest(format!(
            "Unknown user request: /{}",
            segments.join("/")
        ))),
    }
}

async fn person(repository: &dyn Repository, segments: &[&str]) -> DispatchResult<Vec<Record>> {
    match segments {
        ["list"] => Ok(repository.list(PERSON_ENTITY, &RecordFields::new()).await?),
        ["list", "by-id", id] => Ok(vec![repository.get(PERSON_ENTITY, parse_id(id)?).await?]),
        ["list", ..] => Err(DispatchError::BadRequest("Wrong syntax for list".to_string())),
        ["add", pairs @ ..] => {
            let person = person_fields(&params(pairs)?, true)?;
            info!(target: "domogik::dm", entity = PERSON_ENTITY, "add");
            Ok(vec![repository.add(PERSON_ENTITY, person).await?])
        }
        ["update", pairs @ ..] => {
            let params = params(pairs)?;
            let id = parse_id(required(&params, "id")?)?;
            info!(target: "domogik::dm", entity = PERSON_ENTITY, id, "update");
            Ok(vec![
                repository
                    .update(PERSON_ENTITY, id, person_fields(&params, false)?)
                    .await?,
            ])
        }
        ["del", id] => {
            let id = parse_id(id)?;
            let owners = repository
                .list(ACCOUNT_ENTITY, &fields([("person_id", id.to_string().as_str())]))
                .await?;
            if !owners.is_empty() {
                return Err(DispatchError::Conflict(format!(
                    "person {} still has {} account(s)",
                    id,
                    owners.len()
                )));
            }
            info!(target: "domogik::dm", entity = PERSON_ENTITY, id, "del");
            Ok(vec![repository.delete(PERSON_ENTITY, id).await?])
        }
        _ => Err(DispatchError::BadRequest(format!(
            "Unknown person request: /{}",
            segments.join("/")
        ))),
    }
}

async fn ensure_login_free(
    repository: &dyn Repository,
    login: &str,
    owner: Option<RecordId>,
) -> DispatchResult<()> {
    let taken = repository
        .list(ACCOUNT_ENTITY, &fields([("login", login)]))
        .await?
        .into_iter()
        .any(|account| Some(account.id) != owner);
    if taken {
        return Err(DispatchError::Conflict(format!("login '{}' already exists", login)));
    }
    Ok(())
}

/// Person fields found in `params`, with `birthday` as `YYYYMMDD` stored ISO.
fn person_fields(params: &RecordFields, creating: bool) -> DispatchResult<RecordFields> {
    if creating {
        required(params, "first_name")?;
        required(params, "last_name")?;
    }
    let mut person = pick(params, &PERSON_FIELDS);
    if let Some(raw) = person.get_mut("birthday") {
        let birthday = NaiveDate::parse_from_str(raw, "%Y%m%d").map_err(|_| {
            DispatchError::BadRequest(format!("birthday must be YYYYMMDD: {}", raw))
        })?;
        *raw = birthday.format("%Y-%m-%d").to_string();
    }
    Ok(person)
}

fn parse_flag(raw: Option<&String>) -> DispatchResult<String> {
    match raw.map(|s| s.to_ascii_lowercase()).as_deref() {
        None | Some("false" | "0" | "no") => Ok("false".to_string()),
        Some("true" | "1" | "yes") => Ok("true".to_string()),
        Some(other) => Err(DispatchError::BadRequest(format!(
            "is_admin must be true or false: {}",
            other
        ))),
    }
}

/// Pairs as a map. Passwords are never kept: credentials stay with the
/// authentication service.
fn params(pairs: &[&str]) -> DispatchResult<RecordFields> {
    let mut params: RecordFields = key_value_pairs(pairs)?.into_iter().collect();
    if params.remove("password").is_some() {
        debug!("Dropped password parameter");
    }
    Ok(params)
}

fn pick(params: &RecordFields, keys: &[&str]) -> RecordFields {
    params
        .iter()
        .filter(|(key, _)| keys.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn required<'a>(params: &'a RecordFields, key: &str) -> DispatchResult<&'a str> {
    params
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| DispatchError::BadRequest(format!("missing parameter '{}'", key)))
}

fn fields<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> RecordFields {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

pub(crate) fn parse_id(raw: &str) -> DispatchResult<RecordId> {
    raw.parse()
        .map_err(|_| DispatchError::BadRequest(format!("id must be an integer: {}", raw)))
}
