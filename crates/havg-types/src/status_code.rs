/// Status code type alias; codes are banded by subsystem.
#[allow(non_camel_case_types)]
pub type status_code_t = u16;

/// Common status codes (0-999).
pub mod StatusCode {
    use super::status_code_t;

    pub const OK: status_code_t = 0;
    pub const NOT_IMPLEMENTED: status_code_t = 1;
    pub const INVALID_ARG: status_code_t = 2;
    pub const INVALID_CONFIG: status_code_t = 3;
    pub const INVALID_FORMAT: status_code_t = 4;
    pub const INTERRUPTED: status_code_t = 5;
    pub const QUEUE_FULL: status_code_t = 6;
    pub const SHUTTING_DOWN: status_code_t = 7;
    pub const OS_ERROR: status_code_t = 8;
    pub const FOUND_BUG: status_code_t = 998;
    pub const UNKNOWN: status_code_t = 999;
}

/// Coordination store status codes (1xxx).
pub mod KvCode {
    use super::status_code_t;

    pub const TIMEOUT: status_code_t = 1000;
    pub const UNAVAILABLE: status_code_t = 1001;
    pub const TXN_FAILED: status_code_t = 1002;
    pub const WATCH_LOST: status_code_t = 1003;
    pub const LEASE_EXPIRED: status_code_t = 1004;
    pub const LEASE_NOT_FOUND: status_code_t = 1005;
    pub const COMPACTED: status_code_t = 1006;
    pub const CANCELED: status_code_t = 1007;
    pub const PERMANENT: status_code_t = 1008;
}

/// Node registry status codes (2xxx).
pub mod NodeCode {
    use super::status_code_t;

    pub const NOT_FOUND: status_code_t = 2000;
    pub const ALREADY_JOINED: status_code_t = 2001;
    pub const INVALID_TRANSITION: status_code_t = 2002;
    pub const HEARTBEAT_FAIL: status_code_t = 2003;
    pub const SELF_FENCED: status_code_t = 2004;
    pub const NOT_ONLINE: status_code_t = 2005;
}

/// Volume group registry status codes (3xxx).
pub mod VgCode {
    use super::status_code_t;

    pub const NOT_FOUND: status_code_t = 3000;
    pub const ALREADY_EXISTS: status_code_t = 3001;
    pub const BUSY: status_code_t = 3002;
    pub const DISABLED: status_code_t = 3003;
    pub const INVALID_TRANSITION: status_code_t = 3004;
    pub const PRECONDITION_FAILED: status_code_t = 3005;
    pub const ADDRESS_IN_USE: status_code_t = 3006;
    pub const MALFORMED_RECORD: status_code_t = 3007;
    pub const ACTUATION_FAILED: status_code_t = 3008;
}

/// Map a status code to its human-readable name.
pub fn to_string(code: status_code_t) -> String {
    let name = match code {
        0 => "OK",
        1 => "NotImplemented",
        2 => "InvalidArg",
        3 => "InvalidConfig",
        4 => "InvalidFormat",
        5 => "Interrupted",
        6 => "QueueFull",
        7 => "ShuttingDown",
        8 => "OsError",
        998 => "FoundBug",
        999 => "Unknown",

        1000 => "Kv::Timeout",
        1001 => "Kv::Unavailable",
        1002 => "Kv::TxnFailed",
        1003 => "Kv::WatchLost",
        1004 => "Kv::LeaseExpired",
        1005 => "Kv::LeaseNotFound",
        1006 => "Kv::Compacted",
        1007 => "Kv::Canceled",
        1008 => "Kv::Permanent",

        2000 => "Node::NotFound",
        2001 => "Node::AlreadyJoined",
        2002 => "Node::InvalidTransition",
        2003 => "Node::HeartbeatFail",
        2004 => "Node::SelfFenced",
        2005 => "Node::NotOnline",

        3000 => "Vg::NotFound",
        3001 => "Vg::AlreadyExists",
        3002 => "Vg::Busy",
        3003 => "Vg::Disabled",
        3004 => "Vg::InvalidTransition",
        3005 => "Vg::PreconditionFailed",
        3006 => "Vg::AddressInUse",
        3007 => "Vg::MalformedRecord",
        3008 => "Vg::ActuationFailed",

        _ => return format!("Code({})", code),
    };
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_code_names() {
        assert_eq!(to_string(StatusCode::OK), "OK");
        assert_eq!(to_string(StatusCode::INVALID_ARG), "InvalidArg");
        assert_eq!(to_string(StatusCode::UNKNOWN), "Unknown");
    }

    #[test]
    fn test_banded_code_names() {
        assert_eq!(to_string(KvCode::TIMEOUT), "Kv::Timeout");
        assert_eq!(to_string(NodeCode::INVALID_TRANSITION), "Node::InvalidTransition");
        assert_eq!(to_string(VgCode::PRECONDITION_FAILED), "Vg::PreconditionFailed");
    }

    #[test]
    fn test_unnamed_code() {
        assert_eq!(to_string(4242), "Code(4242)");
    }
}
