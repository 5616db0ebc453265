//! Session description conditioning.
//!
//! Codec preference and bitrate bounds are embedded into outgoing
//! descriptions at emit time; they are not renegotiated continuously.

use meshcall_core::{
    peak_video_rate, IceCandidate, IceFilter, IceProtocol, MediaConfiguration, SessionDescription,
};
use tracing::debug;

/// Applies the session's codec and bitrate policy to a freshly created
/// local description. `connection_count` selects the multiparty audio cap.
pub fn condition_description(
    description: SessionDescription,
    config: &MediaConfiguration,
    connection_count: usize,
) -> SessionDescription {
    let audio_rate = if connection_count > 1 {
        config.max_audio_bitrate_multiparty
    } else {
        config.max_audio_bitrate
    };
    let video_rate = peak_video_rate(
        &config.preferred_receiver_format,
        config.target_bpp,
        config.max_video_bitrate,
    );

    let mut sdp = description.sdp;
    sdp = prefer_codec(&sdp, "audio", config.preferred_audio_codec.rtp_name());
    sdp = prefer_codec(&sdp, "video", config.preferred_video_codec.rtp_name());
    sdp = set_media_bandwidth(&sdp, "audio", audio_rate);
    sdp = set_media_bandwidth(&sdp, "video", video_rate);

    SessionDescription {
        kind: description.kind,
        sdp,
    }
}

/// Moves `codec_name`'s payload types to the front of the matching `m=` line
/// so the peer prefers it. Leaves the SDP untouched when the codec or the
/// media section is absent.
pub fn prefer_codec(sdp: &str, media: &str, codec_name: &str) -> String {
    let lines: Vec<&str> = sdp.lines().collect();
    let section_prefix = format!("m={media} ");

    let Some(m_index) = lines.iter().position(|l| l.starts_with(&section_prefix)) else {
        return sdp.to_owned();
    };
    let section_end = lines[m_index + 1..]
        .iter()
        .position(|l| l.starts_with("m="))
        .map(|offset| m_index + 1 + offset)
        .unwrap_or(lines.len());

    // Payload types registered for the codec within this media section.
    let rtpmap_prefix = "a=rtpmap:";
    let preferred: Vec<&str> = lines[m_index + 1..section_end]
        .iter()
        .filter_map(|line| {
            let rest = line.strip_prefix(rtpmap_prefix)?;
            let (payload_type, encoding) = rest.split_once(' ')?;
            let name = encoding.split('/').next()?;
            name.eq_ignore_ascii_case(codec_name)
                .then_some(payload_type)
        })
        .collect();

    if preferred.is_empty() {
        debug!(media, codec = codec_name, "codec not offered, leaving SDP");
        return sdp.to_owned();
    }

    let m_parts: Vec<&str> = lines[m_index].split(' ').collect();
    // m=<media> <port> <proto> <fmt> ...
    if m_parts.len() <= 3 {
        return sdp.to_owned();
    }
    let mut reordered: Vec<&str> = m_parts[..3].to_vec();
    reordered.extend(preferred.iter().copied());
    reordered.extend(
        m_parts[3..]
            .iter()
            .copied()
            .filter(|pt| !preferred.contains(pt)),
    );

    let new_m_line = reordered.join(" ");
    let mut out_lines: Vec<String> = lines.iter().map(|l| (*l).to_owned()).collect();
    out_lines[m_index] = new_m_line;
    rejoin(out_lines, sdp)
}

/// Sets `b=AS:<kbps>` on the matching media section, replacing any existing
/// bandwidth line.
pub fn set_media_bandwidth(sdp: &str, media: &str, kbps: u32) -> String {
    let lines: Vec<&str> = sdp.lines().collect();
    let section_prefix = format!("m={media} ");

    let Some(m_index) = lines.iter().position(|l| l.starts_with(&section_prefix)) else {
        return sdp.to_owned();
    };
    let section_end = lines[m_index + 1..]
        .iter()
        .position(|l| l.starts_with("m="))
        .map(|offset| m_index + 1 + offset)
        .unwrap_or(lines.len());

    let bandwidth_line = format!("b=AS:{kbps}");
    let mut out_lines: Vec<String> = lines.iter().map(|l| (*l).to_owned()).collect();

    if let Some(b_index) = lines[m_index + 1..section_end]
        .iter()
        .position(|l| l.starts_with("b=AS:"))
    {
        out_lines[m_index + 1 + b_index] = bandwidth_line;
    } else {
        // After the section's c= line when present, otherwise right after m=.
        let insert_at = lines[m_index + 1..section_end]
            .iter()
            .position(|l| l.starts_with("c="))
            .map(|offset| m_index + 2 + offset)
            .unwrap_or(m_index + 1);
        out_lines.insert(insert_at, bandwidth_line);
    }
    rejoin(out_lines, sdp)
}

fn rejoin(lines: Vec<String>, original: &str) -> String {
    let separator = if original.contains("\r\n") { "\r\n" } else { "\n" };
    let mut joined = lines.join(separator);
    if original.ends_with(separator) {
        joined.push_str(separator);
    }
    joined
}

/// Applies the configured candidate-type and transport-protocol masks to a
/// locally discovered candidate before it is signaled.
pub fn candidate_matches(candidate: &IceCandidate, filter: IceFilter, protocols: IceProtocol) -> bool {
    let attribute = candidate.candidate.as_str();
    let tokens: Vec<&str> = attribute.split_whitespace().collect();

    let transport_ok = tokens
        .get(2)
        .map(|transport| {
            if transport.eq_ignore_ascii_case("udp") {
                protocols.contains(IceProtocol::UDP)
            } else if transport.eq_ignore_ascii_case("tcp") {
                protocols.contains(IceProtocol::TCP)
            } else {
                false
            }
        })
        .unwrap_or(false);

    let kind = tokens
        .iter()
        .position(|t| *t == "typ")
        .and_then(|i| tokens.get(i + 1).copied());
    let kind_ok = match kind {
        Some("host") => filter.contains(IceFilter::LOCAL),
        Some("srflx") | Some("prflx") => filter.contains(IceFilter::STUN),
        Some("relay") => filter.contains(IceFilter::TURN),
        _ => false,
    };

    transport_ok && kind_ok
}
