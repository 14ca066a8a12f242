// Routing table for inner SNIs, compiled into the binary.
// ud-chat is an alias of the chat endpoint on Signal's side.
static SIGNAL_UPSTREAMS: &[(&str, &str)] = &[
    ("chat.signal.org", "chat.signal.org:443"),
    ("ud-chat.signal.org", "chat.signal.org:443"),
    ("storage.signal.org", "storage.signal.org:443"),
    ("cdn.signal.org", "cdn.signal.org:443"),
    ("cdn2.signal.org", "cdn2.signal.org:443"),
    ("cdn3.signal.org", "cdn3.signal.org:443"),
    ("cdsi.signal.org", "cdsi.signal.org:443"),
    ("contentproxy.signal.org", "contentproxy.signal.org:443"),
    ("sfu.voip.signal.org", "sfu.voip.signal.org:443"),
    ("svr2.signal.org", "svr2.signal.org:443"),
    ("svrb.signal.org", "svrb.signal.org:443"),
    ("updates.signal.org", "updates.signal.org:443"),
    ("updates2.signal.org", "updates2.signal.org:443"),
];

// Map an inner SNI to the Signal upstream to dial. Lookup is case-insensitive;
// any name outside of the table is a rejection.
pub fn resolve(server_name: &str) -> Option<&'static str> {
    SIGNAL_UPSTREAMS
        .iter()
        .find(|(name, _)| server_name.eq_ignore_ascii_case(name))
        .map(|(_, upstream)| *upstream)
}
