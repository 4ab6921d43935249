// Copyright 2026 revcache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

/// Deterministic pseudo document of `len` bytes for revision `revision_id`.
///
/// The first 8 bytes carry the revision id, so a reader can tell which revision it got.
pub fn document(revision_id: u64, len: usize) -> Vec<u8> {
    const TEXT: &[u8] = b"{\"_key\":\"revision\",\"_rev\":\"_gVz5X--_\",\"name\":\"Lorem ipsum dolor sit amet\",\"tags\":[\"a\",\"b\"]}";

    let len = len.max(8);
    let mut res = Vec::with_capacity(len);
    res.extend_from_slice(&revision_id.to_le_bytes());
    let mut cursor = revision_id as usize % TEXT.len();
    while res.len() < len {
        let bytes = std::cmp::min(len - res.len(), TEXT.len() - cursor);
        res.extend_from_slice(&TEXT[cursor..cursor + bytes]);
        cursor = (cursor + bytes) % TEXT.len();
    }
    res
}
