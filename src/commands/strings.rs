//! String commands.
//!
//! - `GET key`
//! - `SET key value [EX seconds | PX milliseconds] [NX | XX] [KEEPTTL]`

use super::{arg_is, flags, parse_i64, CommandError, CommandResult, CommandSpec};
use crate::connection::ClientId;
use crate::protocol::{Request, RespValue};
use crate::server::Server;
use crate::storage::Value;
use std::time::Duration;

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "GET",
        arity: 2,
        flags: 0,
        handler: get,
    },
    CommandSpec {
        name: "SET",
        arity: -3,
        flags: flags::WRITE | flags::DENY_OOM,
        handler: set,
    },
];

/// GET key
fn get(server: &mut Server, id: ClientId, req: &Request) -> CommandResult {
    let db = server.client_db(id)?;
    let now = server.now;

    let value = match server.keyspace.db_mut(db).get(&req.args[0], now) {
        None => None,
        Some(Value::Str(s)) => Some(s.clone()),
        Some(_) => return Err(CommandError::WrongType),
    };
    server.stats.record_lookup(value.is_some());

    Ok(RespValue::from(value).into())
}

#[derive(Debug, Default)]
struct SetOptions {
    ttl: Option<Duration>,
    nx: bool,
    xx: bool,
    keep_ttl: bool,
}

fn parse_set_options(args: &[bytes::Bytes]) -> Result<SetOptions, CommandError> {
    let mut options = SetOptions::default();
    let mut i = 0;

    while i < args.len() {
        let arg = &args[i];
        if arg_is(arg, "EX") || arg_is(arg, "PX") {
            if options.ttl.is_some() || options.keep_ttl {
                return Err(CommandError::Syntax);
            }
            let amount = args.get(i + 1).ok_or(CommandError::Syntax)?;
            let amount = parse_i64(amount)?;
            if amount <= 0 {
                return Err(CommandError::InvalidExpire("set".to_string()));
            }
            options.ttl = Some(if arg_is(arg, "EX") {
                Duration::from_secs(amount as u64)
            } else {
                Duration::from_millis(amount as u64)
            });
            i += 2;
        } else if arg_is(arg, "NX") && !options.xx {
            options.nx = true;
            i += 1;
        } else if arg_is(arg, "XX") && !options.nx {
            options.xx = true;
            i += 1;
        } else if arg_is(arg, "KEEPTTL") && options.ttl.is_none() {
            options.keep_ttl = true;
            i += 1;
        } else {
            return Err(CommandError::Syntax);
        }
    }

    Ok(options)
}

/// SET key value [EX seconds | PX milliseconds] [NX | XX] [KEEPTTL]
///
/// Without KEEPTTL, any previous deadline on the key is cleared. NX and XX
/// reply nil when their condition fails.
fn set(server: &mut Server, id: ClientId, req: &Request) -> CommandResult {
    let options = parse_set_options(&req.args[2..])?;
    let db = server.client_db(id)?;
    let now = server.now;

    let deadline = match options.ttl {
        Some(ttl) => Some(
            now.checked_add(ttl)
                .ok_or_else(|| CommandError::InvalidExpire("set".to_string()))?,
        ),
        None => None,
    };

    let key = req.args[0].clone();
    let db = server.keyspace.db_mut(db);
    let exists = db.contains(&key, now);
    if (options.nx && exists) || (options.xx && !exists) {
        return Ok(RespValue::Null.into());
    }

    let value = Value::Str(req.args[1].clone());
    if options.keep_ttl {
        db.set_keep_ttl(key.clone(), value, now);
    } else {
        db.set(key.clone(), value, now);
    }
    if let Some(deadline) = deadline {
        db.set_expire(&key, deadline, now);
    }

    Ok(RespValue::ok().into())
}

#[cfg(test)]
mod tests {
    use crate::protocol::RespValue;
    use crate::server::test_support::*;
    use crate::storage::TtlStatus;
    use std::time::{Duration, Instant};

    #[test]
    fn test_set_get() {
        let mut server = server();
        let c = connect(&mut server);

        assert_eq!(run(&mut server, c, &["SET", "key", "value"]), b"+OK\r\n");
        assert_eq!(
            run(&mut server, c, &["GET", "key"]),
            bulk("value").serialize()
        );
    }

    #[test]
    fn test_get_nonexistent() {
        let mut server = server();
        let c = connect(&mut server);
        assert_eq!(run(&mut server, c, &["GET", "nope"]), b"$-1\r\n");
    }

    #[test]
    fn test_get_wrong_type() {
        let mut server = server();
        let c = connect(&mut server);

        run(&mut server, c, &["LPUSH", "list", "a"]);
        assert_eq!(
            run(&mut server, c, &["GET", "list"]),
            b"-ERR WRONGTYPE Operation against a key holding the wrong kind of value\r\n"
        );
    }

    #[test]
    fn test_set_overwrites_list() {
        let mut server = server();
        let c = connect(&mut server);

        run(&mut server, c, &["LPUSH", "k", "a"]);
        assert_eq!(run(&mut server, c, &["SET", "k", "v"]), b"+OK\r\n");
        assert_eq!(run(&mut server, c, &["GET", "k"]), bulk("v").serialize());
    }

    #[test]
    fn test_set_with_ex_and_px() {
        let mut server = server();
        let c = connect(&mut server);
        let t0 = Instant::now();
        server.set_clock(t0);

        run(&mut server, c, &["SET", "a", "1", "EX", "10"]);
        run(&mut server, c, &["SET", "b", "1", "px", "1500"]);

        let db = server.keyspace.db_mut(0);
        assert_eq!(db.ttl(b"a", t0), TtlStatus::Remaining(Duration::from_secs(10)));
        assert_eq!(db.ttl(b"b", t0), TtlStatus::Remaining(Duration::from_millis(1500)));

        server.set_clock(t0 + Duration::from_secs(2));
        assert_eq!(run(&mut server, c, &["GET", "b"]), b"$-1\r\n");
        assert_eq!(run(&mut server, c, &["GET", "a"]), bulk("1").serialize());
    }

    #[test]
    fn test_set_clears_previous_ttl() {
        let mut server = server();
        let c = connect(&mut server);

        run(&mut server, c, &["SET", "k", "v", "EX", "100"]);
        run(&mut server, c, &["SET", "k", "v2"]);
        assert_eq!(run(&mut server, c, &["TTL", "k"]), b":-1\r\n");

        run(&mut server, c, &["EXPIRE", "k", "100"]);
        run(&mut server, c, &["SET", "k", "v3", "KEEPTTL"]);
        assert_eq!(run(&mut server, c, &["TTL", "k"]), b":100\r\n");
    }

    #[test]
    fn test_set_nx_xx() {
        let mut server = server();
        let c = connect(&mut server);

        assert_eq!(run(&mut server, c, &["SET", "k", "v", "XX"]), b"$-1\r\n");
        assert_eq!(run(&mut server, c, &["SET", "k", "v", "NX"]), b"+OK\r\n");
        assert_eq!(run(&mut server, c, &["SET", "k", "w", "NX"]), b"$-1\r\n");
        assert_eq!(run(&mut server, c, &["SET", "k", "x", "XX"]), b"+OK\r\n");
        assert_eq!(run(&mut server, c, &["GET", "k"]), bulk("x").serialize());
    }

    #[test]
    fn test_set_option_errors() {
        let mut server = server();
        let c = connect(&mut server);

        let syntax = RespValue::error("syntax error").serialize();
        assert_eq!(run(&mut server, c, &["SET", "k", "v", "NX", "XX"]), syntax);
        assert_eq!(run(&mut server, c, &["SET", "k", "v", "EX"]), syntax);
        assert_eq!(run(&mut server, c, &["SET", "k", "v", "EX", "1", "KEEPTTL"]), syntax);
        assert_eq!(run(&mut server, c, &["SET", "k", "v", "BOGUS"]), syntax);
        assert_eq!(
            run(&mut server, c, &["SET", "k", "v", "EX", "0"]),
            b"-ERR invalid expire time in 'set' command\r\n"
        );
        assert_eq!(
            run(&mut server, c, &["SET", "k", "v", "EX", "ten"]),
            b"-ERR value is not an integer or out of range\r\n"
        );
        assert_eq!(run(&mut server, c, &["GET", "k"]), b"$-1\r\n");
    }

    #[test]
    fn test_binary_values() {
        let mut server = server();
        let c = connect(&mut server);

        run(&mut server, c, &["SET", "bin", "a\r\nb\0c"]);
        assert_eq!(run(&mut server, c, &["GET", "bin"]), b"$6\r\na\r\nb\0c\r\n");
    }
}
