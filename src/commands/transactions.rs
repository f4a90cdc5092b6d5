//! MULTI / EXEC / DISCARD / WATCH / UNWATCH
//!
//! Commands issued between MULTI and EXEC are queued by the dispatcher and
//! acknowledged with `+QUEUED`. EXEC runs them in order and replies with one
//! array holding every command's reply, or aborts without running anything
//! if a watched key was modified after WATCH.

use super::{flags, CommandError, CommandResult, CommandSpec};
use crate::connection::{ClientId, ClientState};
use crate::protocol::{Request, RespValue};
use crate::server::Server;

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "MULTI",
        arity: 1,
        flags: flags::NO_QUEUE,
        handler: multi,
    },
    CommandSpec {
        name: "EXEC",
        arity: 1,
        flags: flags::NO_QUEUE,
        handler: exec,
    },
    CommandSpec {
        name: "DISCARD",
        arity: 1,
        flags: flags::NO_QUEUE,
        handler: discard,
    },
    CommandSpec {
        name: "WATCH",
        arity: -2,
        flags: flags::NO_QUEUE,
        handler: watch,
    },
    CommandSpec {
        name: "UNWATCH",
        arity: 1,
        flags: flags::NO_QUEUE,
        handler: unwatch,
    },
];

/// MULTI
fn multi(server: &mut Server, id: ClientId, _req: &Request) -> CommandResult {
    let client = server.require_client(id)?;
    if client.state == ClientState::InTransaction {
        return Err(CommandError::NestedMulti);
    }
    client.state = ClientState::InTransaction;
    Ok(RespValue::ok().into())
}

/// EXEC
fn exec(server: &mut Server, id: ClientId, _req: &Request) -> CommandResult {
    let client = server.require_client(id)?;
    if client.state != ClientState::InTransaction {
        return Err(CommandError::ExecWithoutMulti);
    }

    let queued = std::mem::take(&mut client.queued);
    client.state = ClientState::Normal;
    let dirty = client.watch_dirty;
    server.unwatch_all(id);

    if dirty {
        return Err(CommandError::ExecAbort);
    }

    server.in_exec = true;
    let replies = queued
        .iter()
        .map(|request| server.call(id, request).into_value())
        .collect();
    server.in_exec = false;

    Ok(RespValue::array(replies).into())
}

/// DISCARD
fn discard(server: &mut Server, id: ClientId, _req: &Request) -> CommandResult {
    let client = server.require_client(id)?;
    if client.state != ClientState::InTransaction {
        return Err(CommandError::DiscardWithoutMulti);
    }
    client.queued.clear();
    client.state = ClientState::Normal;
    server.unwatch_all(id);
    Ok(RespValue::ok().into())
}

/// WATCH key [key ...]
fn watch(server: &mut Server, id: ClientId, req: &Request) -> CommandResult {
    let client = server.require_client(id)?;
    if client.state == ClientState::InTransaction {
        return Err(CommandError::WatchInsideMulti);
    }
    let db = client.db;
    for key in &req.args {
        client.watched.insert((db, key.clone()));
    }
    for key in &req.args {
        server.keyspace.db_mut(db).watch(key.clone(), id);
    }
    Ok(RespValue::ok().into())
}

/// UNWATCH
fn unwatch(server: &mut Server, id: ClientId, _req: &Request) -> CommandResult {
    server.unwatch_all(id);
    Ok(RespValue::ok().into())
}
