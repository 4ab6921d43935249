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

use std::{
    fmt::{Debug, Display},
    ops::{Add, BitAnd, Not, Sub},
};

/// Unsigned integers the alignment helpers work with.
pub trait Unsigned:
    Add<Output = Self>
    + Sub<Output = Self>
    + BitAnd<Output = Self>
    + Not<Output = Self>
    + From<u8>
    + Eq
    + Copy
    + Debug
    + Display
{
}

impl<U> Unsigned for U where
    U: Add<Output = Self>
        + Sub<Output = Self>
        + BitAnd<Output = Self>
        + Not<Output = Self>
        + From<u8>
        + Eq
        + Copy
        + Debug
        + Display
{
}

/// Check if `v` is a power of 2.
#[inline(always)]
pub fn is_pow2<U: Unsigned>(v: U) -> bool {
    v != U::from(0) && v & (v - U::from(1)) == U::from(0)
}

/// Check if `v` is a multiple of `align`.
///
/// `align` must be a power of 2.
#[inline(always)]
pub fn is_aligned<U: Unsigned>(align: U, v: U) -> bool {
    debug_assert!(is_pow2(align), "align: {align}");
    v & (align - U::from(1)) == U::from(0)
}

/// Debug assert that `v` is a multiple of `align`.
#[inline(always)]
pub fn debug_assert_aligned<U: Unsigned>(align: U, v: U) {
    debug_assert!(is_aligned(align, v), "align: {align}, v: {v}");
}

/// Round `v` up to the next multiple of `align`.
///
/// `align` must be a power of 2.
#[inline(always)]
pub fn align_up<U: Unsigned>(align: U, v: U) -> U {
    debug_assert!(is_pow2(align), "align: {align}");
    (v + align - U::from(1)) & !(align - U::from(1))
}
