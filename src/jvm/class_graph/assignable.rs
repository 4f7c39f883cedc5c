use super::{ClassHierarchy, ClassSummary, MissingClass};
use crate::jvm::names::BinaryName;
use crate::jvm::{ArrayType, RefType};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

/// Subtyping relationship between types
///
/// Checks may need to look up classes which turn out to be missing, so they are fallible.
pub trait Assignable {
    /// Is the first type assignable to the second?
    fn is_assignable(
        &self,
        super_type: &Self,
        hierarchy: &dyn ClassHierarchy,
    ) -> Result<bool, MissingClass>;
}

fn lookup(
    hierarchy: &dyn ClassHierarchy,
    name: &BinaryName,
) -> Result<Arc<ClassSummary>, MissingClass> {
    hierarchy
        .lookup(name)
        .ok_or_else(|| MissingClass(name.clone()))
}

/// Chain of superclasses starting at the class itself and ending at `java/lang/Object`
///
/// A cycle in the hierarchy ends the chain at the first repeated class.
pub fn superclass_chain(
    hierarchy: &dyn ClassHierarchy,
    class: &BinaryName,
) -> Result<Vec<BinaryName>, MissingClass> {
    let mut chain = vec![class.clone()];
    let mut visited: HashSet<BinaryName> = HashSet::new();
    visited.insert(class.clone());

    let mut current = lookup(hierarchy, class)?;
    while let Some(superclass) = &current.superclass {
        if !visited.insert(superclass.clone()) {
            break;
        }
        chain.push(superclass.clone());
        current = lookup(hierarchy, superclass)?;
    }
    Ok(chain)
}

/// Is the class a subclass of `java/lang/Throwable`?
pub fn is_throwable(
    hierarchy: &dyn ClassHierarchy,
    class: &BinaryName,
) -> Result<bool, MissingClass> {
    Ok(superclass_chain(hierarchy, class)?.contains(&BinaryName::THROWABLE))
}

/// This follows `isJavaAssignable(sub_type, super_type)` from the type-checking verifier, except
/// that interfaces are treated like `java/lang/Object` (as the inference verifier does). Every
/// class is therefore assignable to every interface.
impl Assignable for BinaryName {
    fn is_assignable(
        &self,
        super_type: &BinaryName,
        hierarchy: &dyn ClassHierarchy,
    ) -> Result<bool, MissingClass> {
        if self == super_type || super_type == &BinaryName::OBJECT {
            return Ok(true);
        }
        if lookup(hierarchy, super_type)?.is_interface() {
            return Ok(true);
        }
        Ok(superclass_chain(hierarchy, self)?.contains(super_type))
    }
}

impl Assignable for RefType<BinaryName> {
    fn is_assignable(
        &self,
        super_type: &RefType<BinaryName>,
        hierarchy: &dyn ClassHierarchy,
    ) -> Result<bool, MissingClass> {
        let assignable = match (self, super_type) {
            // Special superclass and interfaces of all arrays
            (
                RefType::PrimitiveArray(_) | RefType::ObjectArray(_),
                RefType::Object(object_type),
            ) => is_array_type_assignable(object_type),

            // Primitive arrays must match in dimension and type
            (RefType::PrimitiveArray(arr1), RefType::PrimitiveArray(arr2)) => arr1 == arr2,

            // Higher dimensional primitive arrays can be subtypes of object arrays
            (RefType::PrimitiveArray(arr1), RefType::ObjectArray(arr2)) => {
                match arr1.additional_dimensions.cmp(&arr2.additional_dimensions) {
                    Ordering::Less | Ordering::Equal => false,
                    Ordering::Greater => is_array_type_assignable(&arr2.element_type),
                }
            }

            // Covariance of arrays
            (RefType::ObjectArray(arr1), RefType::ObjectArray(arr2)) => {
                match arr1.additional_dimensions.cmp(&arr2.additional_dimensions) {
                    Ordering::Less => false,
                    Ordering::Equal => arr1
                        .element_type
                        .is_assignable(&arr2.element_type, hierarchy)?,
                    Ordering::Greater => is_array_type_assignable(&arr2.element_type),
                }
            }

            (RefType::Object(cls1), RefType::Object(cls2)) => {
                cls1.is_assignable(cls2, hierarchy)?
            }

            _ => false,
        };
        Ok(assignable)
    }
}

/// Check if arrays can be assigned to a super type
///
/// This bakes in knowledge of the small, finite set of super types arrays have.
fn is_array_type_assignable(super_type: &BinaryName) -> bool {
    super_type == &BinaryName::OBJECT
        || super_type == &BinaryName::CLONEABLE
        || super_type == &BinaryName::SERIALIZABLE
}

/// Closest common superclass of two classes
///
/// Interfaces merge to `java/lang/Object`.
pub fn common_superclass(
    hierarchy: &dyn ClassHierarchy,
    class1: &BinaryName,
    class2: &BinaryName,
) -> Result<BinaryName, MissingClass> {
    if class1 == class2 {
        return Ok(class1.clone());
    }
    if lookup(hierarchy, class1)?.is_interface() || lookup(hierarchy, class2)?.is_interface() {
        return Ok(BinaryName::OBJECT);
    }

    let ancestors: HashSet<BinaryName> = superclass_chain(hierarchy, class1)?.into_iter().collect();
    let common = superclass_chain(hierarchy, class2)?
        .into_iter()
        .find(|class| ancestors.contains(class))
        .unwrap_or(BinaryName::OBJECT);
    Ok(common)
}

/// Least upper bound of two reference types
///
/// Object arrays of the same depth merge element-wise. Any other pair of arrays merges to an
/// array of `java/lang/Object` as deep as the shallower one allows, and arrays merge with
/// non-arrays to `java/lang/Object`.
pub fn least_upper_bound(
    hierarchy: &dyn ClassHierarchy,
    type1: &RefType<BinaryName>,
    type2: &RefType<BinaryName>,
) -> Result<RefType<BinaryName>, MissingClass> {
    if type1 == type2 {
        return Ok(type1.clone());
    }

    let merged = match (type1, type2) {
        (RefType::Object(cls1), RefType::Object(cls2)) => {
            RefType::Object(common_superclass(hierarchy, cls1, cls2)?)
        }
        (RefType::ObjectArray(arr1), RefType::ObjectArray(arr2))
            if arr1.additional_dimensions == arr2.additional_dimensions =>
        {
            RefType::ObjectArray(ArrayType {
                additional_dimensions: arr1.additional_dimensions,
                element_type: common_superclass(hierarchy, &arr1.element_type, &arr2.element_type)?,
            })
        }
        (RefType::Object(_), _) | (_, RefType::Object(_)) => RefType::Object(BinaryName::OBJECT),
        _ => {
            let depth = reference_depth(type1).min(reference_depth(type2));
            if depth == 0 {
                RefType::Object(BinaryName::OBJECT)
            } else {
                RefType::ObjectArray(ArrayType {
                    additional_dimensions: depth - 1,
                    element_type: BinaryName::OBJECT,
                })
            }
        }
    };
    Ok(merged)
}

/// Number of array dimensions whose elements are references
fn reference_depth(ref_type: &RefType<BinaryName>) -> usize {
    match ref_type {
        RefType::Object(_) => 0,
        RefType::ObjectArray(arr) => arr.dimensions(),
        RefType::PrimitiveArray(arr) => arr.additional_dimensions,
    }
}
