//! Generic key commands: deletion, existence, type inspection and TTLs.
//!
//! TTL replies follow the usual convention: `-2` when the key does not
//! exist, `-1` when it has no deadline, otherwise the time remaining.

use super::{arg_is, bulk, flags, parse_i64, CommandError, CommandResult, CommandSpec};
use crate::connection::ClientId;
use crate::protocol::{Request, RespValue};
use crate::server::Server;
use crate::storage::{GlobPattern, TtlStatus};
use std::time::Duration;

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "DEL",
        arity: -2,
        flags: flags::WRITE,
        handler: del,
    },
    CommandSpec {
        name: "EXISTS",
        arity: -2,
        flags: 0,
        handler: exists,
    },
    CommandSpec {
        name: "TYPE",
        arity: 2,
        flags: 0,
        handler: key_type,
    },
    CommandSpec {
        name: "EXPIRE",
        arity: 3,
        flags: flags::WRITE,
        handler: expire,
    },
    CommandSpec {
        name: "PEXPIRE",
        arity: 3,
        flags: flags::WRITE,
        handler: pexpire,
    },
    CommandSpec {
        name: "PERSIST",
        arity: 2,
        flags: flags::WRITE,
        handler: persist,
    },
    CommandSpec {
        name: "TTL",
        arity: 2,
        flags: 0,
        handler: ttl,
    },
    CommandSpec {
        name: "PTTL",
        arity: 2,
        flags: 0,
        handler: pttl,
    },
    CommandSpec {
        name: "KEYS",
        arity: 2,
        flags: 0,
        handler: keys,
    },
    CommandSpec {
        name: "OBJECT",
        arity: -2,
        flags: 0,
        handler: object,
    },
];

/// DEL key [key ...]
fn del(server: &mut Server, id: ClientId, req: &Request) -> CommandResult {
    let db = server.client_db(id)?;
    let now = server.now;
    let db = server.keyspace.db_mut(db);

    let deleted = req.args.iter().filter(|key| db.delete(key, now)).count();
    Ok(RespValue::integer(deleted as i64).into())
}

/// EXISTS key [key ...]
///
/// A key named more than once is counted more than once.
fn exists(server: &mut Server, id: ClientId, req: &Request) -> CommandResult {
    let db = server.client_db(id)?;
    let now = server.now;
    let db = server.keyspace.db_mut(db);

    let count = req.args.iter().filter(|key| db.contains(key, now)).count();
    Ok(RespValue::integer(count as i64).into())
}

/// TYPE key
fn key_type(server: &mut Server, id: ClientId, req: &Request) -> CommandResult {
    let db = server.client_db(id)?;
    let now = server.now;
    let db = server.keyspace.db_mut(db);

    let kind = if db.contains(&req.args[0], now) {
        db.peek(&req.args[0])
            .map_or("none", |entry| entry.value.kind().as_str())
    } else {
        "none"
    };
    Ok(RespValue::simple_string(kind).into())
}

fn expire_after(
    server: &mut Server,
    id: ClientId,
    req: &Request,
    millis: bool,
    name: &str,
) -> CommandResult {
    let amount = parse_i64(&req.args[1])?;
    let db = server.client_db(id)?;
    let now = server.now;
    let key = &req.args[0];
    let db = server.keyspace.db_mut(db);

    // a deadline that is already due deletes the key right away
    if amount <= 0 {
        return Ok(RespValue::integer(db.delete(key, now) as i64).into());
    }

    let ttl = if millis {
        Duration::from_millis(amount as u64)
    } else {
        Duration::from_secs(amount as u64)
    };
    let deadline = now
        .checked_add(ttl)
        .ok_or_else(|| CommandError::InvalidExpire(name.to_string()))?;

    Ok(RespValue::integer(db.set_expire(key, deadline, now) as i64).into())
}

/// EXPIRE key seconds
fn expire(server: &mut Server, id: ClientId, req: &Request) -> CommandResult {
    expire_after(server, id, req, false, "expire")
}

/// PEXPIRE key milliseconds
fn pexpire(server: &mut Server, id: ClientId, req: &Request) -> CommandResult {
    expire_after(server, id, req, true, "pexpire")
}

/// PERSIST key
fn persist(server: &mut Server, id: ClientId, req: &Request) -> CommandResult {
    let db = server.client_db(id)?;
    let now = server.now;
    let removed = server.keyspace.db_mut(db).persist(&req.args[0], now);
    Ok(RespValue::integer(removed as i64).into())
}

fn ttl_status(server: &mut Server, id: ClientId, req: &Request) -> Result<TtlStatus, CommandError> {
    let db = server.client_db(id)?;
    let now = server.now;
    Ok(server.keyspace.db_mut(db).ttl(&req.args[0], now))
}

/// TTL key
fn ttl(server: &mut Server, id: ClientId, req: &Request) -> CommandResult {
    let reply = match ttl_status(server, id, req)? {
        TtlStatus::Missing => -2,
        TtlStatus::Persistent => -1,
        TtlStatus::Remaining(left) => ((left.as_millis() + 500) / 1000) as i64,
    };
    Ok(RespValue::integer(reply).into())
}

/// PTTL key
fn pttl(server: &mut Server, id: ClientId, req: &Request) -> CommandResult {
    let reply = match ttl_status(server, id, req)? {
        TtlStatus::Missing => -2,
        TtlStatus::Persistent => -1,
        TtlStatus::Remaining(left) => left.as_millis() as i64,
    };
    Ok(RespValue::integer(reply).into())
}

/// KEYS pattern
fn keys(server: &mut Server, id: ClientId, req: &Request) -> CommandResult {
    let db = server.client_db(id)?;
    let pattern = GlobPattern::new(&req.args[0]);
    let keys = server.keyspace.db(db).keys(&pattern, server.now);

    Ok(RespValue::array(keys.into_iter().map(RespValue::BulkString).collect()).into())
}

/// OBJECT ENCODING key
fn object(server: &mut Server, id: ClientId, req: &Request) -> CommandResult {
    if !arg_is(&req.args[0], "ENCODING") {
        return Err(CommandError::Syntax);
    }
    if req.args.len() != 2 {
        return Err(CommandError::WrongArity("object|encoding".to_string()));
    }

    let db = server.client_db(id)?;
    let now = server.now;
    let db = server.keyspace.db_mut(db);
    if !db.contains(&req.args[1], now) {
        return Ok(RespValue::Null.into());
    }

    let reply = match db.peek(&req.args[1]) {
        Some(entry) => bulk(entry.value.encoding().as_str()),
        None => RespValue::Null,
    };
    Ok(reply.into())
}
