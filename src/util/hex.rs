pub mod tagged_rawhex {
	/// Encodes a byte sequence into either a raw, or a lowercase hex variant, prefixed with
	/// `r-<size in bytes> ` or  `h ` respectively.
	///
	/// Does hex if the sequence contains `b'\n'` or additionally `b' '`.
	///
	/// The `<size in bytes>` added to the raw tag makes it harder to miss (or for an editor to
	/// mangle) values that end on whitespace or other non-printing characters.
	pub fn encode(hex_on_space: bool, bytes: &[u8]) -> Vec<u8> {
		let raw = !bytes
			.iter()
			.any(|byte| *byte == b'\n' || hex_on_space && *byte == b' ');

		let mut result = if raw {
			format!("r-{} ", bytes.len()).into_bytes()
		} else {
			vec![b'h', b' ']
		};

		if raw {
			result.extend(bytes)
		} else {
			result.extend(super::encode(bytes))
		};

		result
	}

	/// Inverse of [`encode`]. Returns `None` on a malformed tag, a length mismatch or invalid hex.
	pub fn decode(tagged: &[u8]) -> Option<Vec<u8>> {
		if let Some(hex) = tagged.strip_prefix(b"h ") {
			return super::decode(hex);
		}

		let rest = tagged.strip_prefix(b"r-")?;
		let space = rest.iter().position(|b| *b == b' ')?;
		let len: usize = std::str::from_utf8(&rest[..space]).ok()?.parse().ok()?;
		let data = &rest[space + 1..];
		(data.len() == len).then(|| data.to_vec())
	}
}

/// Produces lowercase-hex encoded data
pub fn encode(bytes: &[u8]) -> Vec<u8> {
	let mut result = Vec::with_capacity(bytes.len() * 2);
	let hex_char = b"0123456789abcdef";
	for byte in bytes {
		result.push(hex_char[(*byte >> 4) as usize]);
		result.push(hex_char[(*byte & 0x0F) as usize]);
	}
	result
}

/// Decodes lowercase hex encoded data. `None` on odd length or non-hex characters
pub fn decode(hex_str: &[u8]) -> Option<Vec<u8>> {
	if hex_str.len() % 2 != 0 {
		return None;
	}

	fn val_of(c: u8) -> Option<u8> {
		match c {
			b'0'..=b'9' => Some(c - b'0'),
			b'a'..=b'f' => Some(c - b'a' + 10),
			_ => None,
		}
	}

	hex_str
		.chunks(2)
		.map(|pair| Some(val_of(pair[0])? << 4 | val_of(pair[1])?))
		.collect()
}

/// Whether `s` is a non-empty lowercase hex string, as produced by [`encode`]
pub fn is_lower_hex(s: &str) -> bool {
	!s.is_empty() && s.bytes().all(|c| matches!(c, b'0'..=b'9' | b'a'..=b'f'))
}
