use std::borrow::Cow;

/// IANA protocol name for a protocol number. Unassigned or unlisted numbers
/// fall back to the decimal number.
pub fn protocol_name(proto: u8) -> Cow<'static, str> {
    let name = match proto {
        0 => "HOPOPT",
        1 => "ICMP",
        2 => "IGMP",
        4 => "IPV4",
        6 => "TCP",
        8 => "EGP",
        9 => "IGP",
        17 => "UDP",
        27 => "RDP",
        41 => "IPV6",
        43 => "IPV6-ROUTE",
        44 => "IPV6-FRAG",
        46 => "RSVP",
        47 => "GRE",
        50 => "ESP",
        51 => "AH",
        58 => "IPV6-ICMP",
        59 => "IPV6-NONXT",
        60 => "IPV6-OPTS",
        88 => "EIGRP",
        89 => "OSPF",
        94 => "IPIP",
        103 => "PIM",
        112 => "VRRP",
        115 => "L2TP",
        132 => "SCTP",
        136 => "UDPLITE",
        137 => "MPLS-IN-IP",
        _ => return Cow::Owned(proto.to_string()),
    };
    Cow::Borrowed(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_protocols() {
        assert_eq!(protocol_name(6), "TCP");
        assert_eq!(protocol_name(17), "UDP");
        assert_eq!(protocol_name(1), "ICMP");
    }

    #[test]
    fn test_unknown_protocol_is_never_empty() {
        assert_eq!(protocol_name(253), "253");
    }
}
