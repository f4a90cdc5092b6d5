//! List commands.
//!
//! Lists are stored in the compact encoding. A push onto a key that blocked
//! clients are waiting for signals the blocking registry; the server hands
//! the new elements to the waiters once the push command has finished.

use super::{flags, parse_i64, parse_timeout, CommandResult, CommandSpec, Reply};
use crate::connection::{BlockState, ClientId};
use crate::protocol::{Request, RespValue};
use crate::server::Server;
use crate::storage::ListEnd;
use bytes::Bytes;

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "LPUSH",
        arity: -3,
        flags: flags::WRITE | flags::DENY_OOM,
        handler: lpush,
    },
    CommandSpec {
        name: "RPUSH",
        arity: -3,
        flags: flags::WRITE | flags::DENY_OOM,
        handler: rpush,
    },
    CommandSpec {
        name: "LPOP",
        arity: 2,
        flags: flags::WRITE,
        handler: lpop,
    },
    CommandSpec {
        name: "RPOP",
        arity: 2,
        flags: flags::WRITE,
        handler: rpop,
    },
    CommandSpec {
        name: "LLEN",
        arity: 2,
        flags: 0,
        handler: llen,
    },
    CommandSpec {
        name: "LINDEX",
        arity: 3,
        flags: 0,
        handler: lindex,
    },
    CommandSpec {
        name: "LRANGE",
        arity: 4,
        flags: 0,
        handler: lrange,
    },
    CommandSpec {
        name: "BLPOP",
        arity: -3,
        flags: flags::WRITE,
        handler: blpop,
    },
    CommandSpec {
        name: "BRPOP",
        arity: -3,
        flags: flags::WRITE,
        handler: brpop,
    },
];

fn push(server: &mut Server, id: ClientId, req: &Request, end: ListEnd) -> CommandResult {
    let db = server.client_db(id)?;
    let now = server.now;
    let key = &req.args[0];

    let len = server
        .keyspace
        .db_mut(db)
        .list_push(key, &req.args[1..], end, now)?;
    server.blocking.signal_ready(db, key);

    Ok(RespValue::integer(len as i64).into())
}

/// LPUSH key element [element ...]
///
/// Elements are pushed one at a time, so `LPUSH k a b c` leaves `c` first.
fn lpush(server: &mut Server, id: ClientId, req: &Request) -> CommandResult {
    push(server, id, req, ListEnd::Head)
}

/// RPUSH key element [element ...]
fn rpush(server: &mut Server, id: ClientId, req: &Request) -> CommandResult {
    push(server, id, req, ListEnd::Tail)
}

fn pop(server: &mut Server, id: ClientId, req: &Request, end: ListEnd) -> CommandResult {
    let db = server.client_db(id)?;
    let now = server.now;
    let popped = server.keyspace.db_mut(db).list_pop(&req.args[0], end, now)?;
    Ok(RespValue::from(popped).into())
}

/// LPOP key
fn lpop(server: &mut Server, id: ClientId, req: &Request) -> CommandResult {
    pop(server, id, req, ListEnd::Head)
}

/// RPOP key
fn rpop(server: &mut Server, id: ClientId, req: &Request) -> CommandResult {
    pop(server, id, req, ListEnd::Tail)
}

/// LLEN key
fn llen(server: &mut Server, id: ClientId, req: &Request) -> CommandResult {
    let db = server.client_db(id)?;
    let now = server.now;
    let len = server
        .keyspace
        .db_mut(db)
        .list(&req.args[0], now)?
        .map_or(0, |list| list.len());
    Ok(RespValue::integer(len as i64).into())
}

/// LINDEX key index
fn lindex(server: &mut Server, id: ClientId, req: &Request) -> CommandResult {
    let index = parse_i64(&req.args[1])?;
    let db = server.client_db(id)?;
    let now = server.now;

    let element = server
        .keyspace
        .db_mut(db)
        .list(&req.args[0], now)?
        .and_then(|list| list.get(index))
        .map(Bytes::copy_from_slice);
    server.stats.record_lookup(element.is_some());

    Ok(RespValue::from(element).into())
}

/// LRANGE key start stop
///
/// Negative indices count from the tail; out-of-range bounds are clamped.
fn lrange(server: &mut Server, id: ClientId, req: &Request) -> CommandResult {
    let start = parse_i64(&req.args[1])?;
    let stop = parse_i64(&req.args[2])?;
    let db = server.client_db(id)?;
    let now = server.now;

    let elements = server
        .keyspace
        .db_mut(db)
        .list(&req.args[0], now)?
        .map(|list| list.range(start, stop));
    server.stats.record_lookup(elements.is_some());

    let elements = elements.unwrap_or_default();
    Ok(RespValue::array(elements.into_iter().map(RespValue::BulkString).collect()).into())
}

/// Shared body of BLPOP and BRPOP.
///
/// Keys are tried in order; the first non-empty list answers immediately.
/// Otherwise the client blocks until a push or its deadline. Inside EXEC
/// the command never blocks and replies nil instead.
fn blocking_pop(server: &mut Server, id: ClientId, req: &Request, end: ListEnd) -> CommandResult {
    let (timeout, keys) = match req.args.split_last() {
        Some((timeout, keys)) => (parse_timeout(timeout)?, keys),
        None => return Ok(RespValue::Null.into()),
    };
    let db = server.client_db(id)?;
    let now = server.now;

    for key in keys {
        if let Some(element) = server.keyspace.db_mut(db).list_pop(key, end, now)? {
            return Ok(RespValue::array(vec![
                RespValue::BulkString(key.clone()),
                RespValue::BulkString(element),
            ])
            .into());
        }
    }

    if server.in_exec {
        return Ok(RespValue::Null.into());
    }

    server.block_client(
        id,
        BlockState {
            db,
            keys: keys.to_vec(),
            end,
            deadline: timeout.and_then(|t| now.checked_add(t)),
        },
    );
    Ok(Reply::Blocked)
}

/// BLPOP key [key ...] timeout
fn blpop(server: &mut Server, id: ClientId, req: &Request) -> CommandResult {
    blocking_pop(server, id, req, ListEnd::Head)
}

/// BRPOP key [key ...] timeout
fn brpop(server: &mut Server, id: ClientId, req: &Request) -> CommandResult {
    blocking_pop(server, id, req, ListEnd::Tail)
}

#[cfg(test)]
mod tests {
    use crate::connection::ClientState;
    use crate::protocol::RespValue;
    use crate::server::test_support::*;
    use std::time::{Duration, Instant};

    fn array(items: &[&str]) -> Vec<u8> {
        RespValue::array(items.iter().map(|s| bulk(s)).collect()).serialize()
    }

    #[test]
    fn test_push_and_range() {
        let mut server = server();
        let c = connect(&mut server);

        assert_eq!(run(&mut server, c, &["RPUSH", "l", "a", "b"]), b":2\r\n");
        assert_eq!(run(&mut server, c, &["LPUSH", "l", "y", "z"]), b":4\r\n");
        assert_eq!(
            run(&mut server, c, &["LRANGE", "l", "0", "-1"]),
            array(&["z", "y", "a", "b"])
        );
        assert_eq!(run(&mut server, c, &["LRANGE", "l", "-2", "100"]), array(&["a", "b"]));
        assert_eq!(run(&mut server, c, &["LRANGE", "l", "3", "1"]), b"*0\r\n");
        assert_eq!(run(&mut server, c, &["LRANGE", "missing", "0", "-1"]), b"*0\r\n");
    }

    #[test]
    fn test_pop_len_index() {
        let mut server = server();
        let c = connect(&mut server);

        run(&mut server, c, &["RPUSH", "l", "a", "b", "c"]);
        assert_eq!(run(&mut server, c, &["LLEN", "l"]), b":3\r\n");
        assert_eq!(run(&mut server, c, &["LINDEX", "l", "-1"]), bulk("c").serialize());
        assert_eq!(run(&mut server, c, &["LINDEX", "l", "5"]), b"$-1\r\n");
        assert_eq!(run(&mut server, c, &["LPOP", "l"]), bulk("a").serialize());
        assert_eq!(run(&mut server, c, &["RPOP", "l"]), bulk("c").serialize());
        assert_eq!(run(&mut server, c, &["RPOP", "l"]), bulk("b").serialize());
        assert_eq!(run(&mut server, c, &["RPOP", "l"]), b"$-1\r\n");
        assert_eq!(run(&mut server, c, &["EXISTS", "l"]), b":0\r\n");
        assert_eq!(run(&mut server, c, &["LLEN", "l"]), b":0\r\n");
    }

    #[test]
    fn test_list_wrong_type() {
        let mut server = server();
        let c = connect(&mut server);
        let wrongtype =
            b"-ERR WRONGTYPE Operation against a key holding the wrong kind of value\r\n".to_vec();

        run(&mut server, c, &["SET", "s", "v"]);
        assert_eq!(run(&mut server, c, &["LPUSH", "s", "x"]), wrongtype);
        assert_eq!(run(&mut server, c, &["LRANGE", "s", "0", "-1"]), wrongtype);
        assert_eq!(run(&mut server, c, &["LPOP", "s"]), wrongtype);
        assert_eq!(run(&mut server, c, &["BLPOP", "s", "0"]), wrongtype);
    }

    #[test]
    fn test_blpop_immediate() {
        let mut server = server();
        let c = connect(&mut server);

        run(&mut server, c, &["RPUSH", "second", "x", "y"]);
        assert_eq!(
            run(&mut server, c, &["BLPOP", "first", "second", "1"]),
            array(&["second", "x"])
        );
        assert_eq!(
            run(&mut server, c, &["BRPOP", "second", "1"]),
            array(&["second", "y"])
        );
    }

    #[test]
    fn test_blpop_woken_by_push_in_fifo_order() {
        let mut server = server();
        let w1 = connect(&mut server);
        let w2 = connect(&mut server);
        let pusher = connect(&mut server);

        assert!(run(&mut server, w1, &["BLPOP", "q", "0"]).is_empty());
        assert!(run(&mut server, w2, &["BLPOP", "q", "0"]).is_empty());

        assert_eq!(run(&mut server, pusher, &["RPUSH", "q", "job1"]), b":1\r\n");
        assert_eq!(&server.take_output(w1)[..], &array(&["q", "job1"])[..]);
        assert!(server.take_output(w2).is_empty());
        assert_eq!(server.client(w1).unwrap().state, ClientState::Normal);
        assert_eq!(server.client(w2).unwrap().state, ClientState::Blocked);

        // the element went to the waiter, not to the list
        assert_eq!(run(&mut server, pusher, &["LLEN", "q"]), b":0\r\n");

        run(&mut server, pusher, &["RPUSH", "q", "job2", "job3"]);
        assert_eq!(&server.take_output(w2)[..], &array(&["q", "job2"])[..]);
        assert_eq!(run(&mut server, pusher, &["LRANGE", "q", "0", "-1"]), array(&["job3"]));
    }

    #[test]
    fn test_buffered_input_runs_after_unblock() {
        let mut server = server();
        let waiter = connect(&mut server);
        let pusher = connect(&mut server);

        let mut input = encode(&["BLPOP", "q", "0"]);
        input.extend_from_slice(&encode(&["PING"]));
        server.feed(waiter, &input);
        server.process_input(waiter);
        assert!(server.take_output(waiter).is_empty());

        run(&mut server, pusher, &["LPUSH", "q", "v"]);
        let mut expected = array(&["q", "v"]);
        expected.extend_from_slice(b"+PONG\r\n");
        assert_eq!(&server.take_output(waiter)[..], &expected[..]);
    }

    #[test]
    fn test_blpop_timeout() {
        let mut server = server();
        let c = connect(&mut server);
        let t0 = Instant::now();
        server.set_clock(t0);

        assert!(run(&mut server, c, &["BRPOP", "q", "0.2"]).is_empty());
        server.set_clock(t0 + Duration::from_millis(100));
        server.cron();
        assert!(server.take_output(c).is_empty());

        server.set_clock(t0 + Duration::from_millis(250));
        server.cron();
        assert_eq!(&server.take_output(c)[..], b"$-1\r\n");
        assert_eq!(server.blocked_count(), 0);
    }

    #[test]
    fn test_blpop_timeout_errors() {
        let mut server = server();
        let c = connect(&mut server);

        assert_eq!(
            run(&mut server, c, &["BLPOP", "q", "-1"]),
            b"-ERR timeout is negative\r\n"
        );
        assert_eq!(
            run(&mut server, c, &["BLPOP", "q", "later"]),
            b"-ERR timeout is not a float or out of range\r\n"
        );
        assert_eq!(server.blocked_count(), 0);
    }

    #[test]
    fn test_blpop_inside_exec_does_not_block() {
        let mut server = server();
        let c = connect(&mut server);

        run(&mut server, c, &["MULTI"]);
        run(&mut server, c, &["BLPOP", "q", "0"]);
        assert_eq!(run(&mut server, c, &["EXEC"]), b"*1\r\n$-1\r\n");
        assert_eq!(server.blocked_count(), 0);
    }

    #[test]
    fn test_element_too_large() {
        let mut server = server();
        let c = connect(&mut server);

        let big = "x".repeat(u16::MAX as usize + 1);
        let reply = run(&mut server, c, &["RPUSH", "l", &big]);
        assert!(reply.starts_with(b"-ERR list element of 65536 bytes"));
        assert_eq!(run(&mut server, c, &["EXISTS", "l"]), b":0\r\n");
    }

    #[test]
    fn test_rejected_push_keeps_waiter_blocked() {
        let mut server = server();
        let waiter = connect(&mut server);
        let pusher = connect(&mut server);

        assert!(run(&mut server, waiter, &["BLPOP", "q", "0"]).is_empty());

        let big = "x".repeat(70_000);
        let reply = run(&mut server, pusher, &["RPUSH", "q", "a", &big]);
        assert!(reply.starts_with(b"-ERR list element of 70000 bytes"));
        assert_eq!(run(&mut server, pusher, &["LLEN", "q"]), b":0\r\n");
        assert_eq!(run(&mut server, pusher, &["EXISTS", "q"]), b":0\r\n");

        assert!(server.take_output(waiter).is_empty());
        assert_eq!(server.client(waiter).unwrap().state, ClientState::Blocked);
        assert_eq!(server.blocked_count(), 1);

        // a valid push afterwards still reaches the waiter
        run(&mut server, pusher, &["RPUSH", "q", "a"]);
        assert_eq!(server.take_output(waiter).to_vec(), array(&["q", "a"]));
    }

    #[test]
    fn test_rejected_push_does_not_dirty_watchers() {
        let mut server = server();
        let c1 = connect(&mut server);
        let c2 = connect(&mut server);

        run(&mut server, c2, &["RPUSH", "l", "a"]);
        run(&mut server, c1, &["WATCH", "l"]);

        let big = "x".repeat(70_000);
        assert!(run(&mut server, c2, &["LPUSH", "l", &big]).starts_with(b"-ERR"));
        assert!(!server.client(c1).unwrap().watch_dirty);

        run(&mut server, c1, &["MULTI"]);
        run(&mut server, c1, &["LLEN", "l"]);
        assert_eq!(run(&mut server, c1, &["EXEC"]), b"*1\r\n:1\r\n");
    }
}
